//! CLI command implementations.

mod config;
mod send;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use send::{run_send, SendArgs};
