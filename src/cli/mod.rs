//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// kvsink - batched key-value output to Redis-compatible stores.
#[derive(Parser, Debug)]
#[command(name = "kvsink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send output items through a declaration.
    Send(commands::SendArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
