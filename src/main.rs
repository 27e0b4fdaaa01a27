//! kvsink - CLI entrypoint.
//!
//! Usage:
//!   kvsink --config config/kvsink.toml send --declaration views --item '{"key":"k"}'
//!   kvsink send --declaration views --items-file items.jsonl --dry-run
//!   kvsink config validate --config config/kvsink.toml
//!   kvsink config show --format json

use anyhow::Result;
use clap::Parser;
use kvsink::cli::commands::{run_config, run_send};
use kvsink::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/kvsink.toml"));

    match cli.command {
        Commands::Send(args) => run_send(&config_path, cli.log_level, args).await,
        Commands::Config(args) => run_config(&config_path, args),
    }
}
