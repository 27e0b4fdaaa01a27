//! Config command implementation.

use crate::backend::ConnectionAddress;
use crate::core::config::SinkConfig;
use crate::core::merge::{merge_operation, resolve_mode, resolve_target};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Print the configuration with defaults applied.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(config_path: &Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => show_config(config_path, &format),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = SinkConfig::from_file(path)?;
    println!("✓ Config file is valid");

    if config.declarations.is_empty() {
        println!("  ⚠ Warning: no [declarations.*] sections found");
    }

    for (name, declaration) in &config.declarations {
        let mode = resolve_mode(declaration, &config.provider);
        let operation = merge_operation(None, declaration.operation, config.provider.operation);
        match resolve_target(declaration, &config.provider) {
            Ok(target) => {
                let backend = match ConnectionAddress::parse(&target.connection)? {
                    ConnectionAddress::Memory { .. } => "memory",
                    ConnectionAddress::Redis(_) => "redis",
                };
                println!(
                    "  {} → {} ({}, db {}, {}, batch={}, transaction={})",
                    name,
                    target.connection,
                    backend,
                    target
                        .database
                        .map(|db| db.to_string())
                        .unwrap_or_else(|| "default".to_string()),
                    operation,
                    mode.send_in_batch,
                    mode.send_in_transaction
                );
            }
            Err(e) => println!("  ⚠ Warning: declaration '{}': {}", name, e),
        }
    }

    println!("✓ Configuration validation complete");
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = SinkConfig::from_file(path)?;
    print!("{}", render_config(&config, format)?);
    Ok(())
}

fn render_config(config: &SinkConfig, format: &str) -> Result<String> {
    match format {
        "json" => Ok(format!("{}\n", serde_json::to_string_pretty(config)?)),
        "toml" => Ok(toml::to_string_pretty(config)?),
        other => anyhow::bail!("unknown format '{}', expected toml or json", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SinkConfig {
        SinkConfig::from_toml(
            r#"
[provider]
connection = "memory://cfg"
send_in_transaction = false

[declarations.views]
key = "views"
operation = "increment"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_render_json() {
        let rendered = render_config(&sample(), "json").unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["provider"]["send_in_transaction"], false);
        assert_eq!(value["declarations"]["views"]["operation"], "increment");
    }

    #[test]
    fn test_render_toml_round_trips() {
        let rendered = render_config(&sample(), "toml").unwrap();
        let reparsed = SinkConfig::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.declarations["views"], sample().declarations["views"]);
    }

    #[test]
    fn test_render_unknown_format() {
        assert!(render_config(&sample(), "yaml").is_err());
    }
}
