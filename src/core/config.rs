//! Configuration parsing and validation.
//!
//! Sink configuration is loaded from TOML files with CLI overrides. The
//! `[provider]` table is the global fallback layer; each
//! `[declarations.<name>]` table describes one output binding and overrides
//! the provider layer field by field.
//!
//! ```toml
//! [provider]
//! connection = "redis://127.0.0.1:6379"
//! send_in_batch = true
//! send_in_transaction = false
//!
//! [declarations.page-views]
//! key = "views"
//! operation = "increment"
//! ```

use crate::backend::ConnectionAddress;
use crate::output::item::Operation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Highest logical database index accepted in configuration.
pub const MAX_DATABASE_INDEX: u32 = 15;

/// Top-level sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Provider (global) defaults.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Named binding declarations.
    #[serde(default)]
    pub declarations: BTreeMap<String, DeclarationConfig>,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Provider-level configuration: the least specific layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Default item key.
    #[serde(default)]
    pub key: Option<String>,

    /// Default connection identifier.
    #[serde(default)]
    pub connection: Option<String>,

    /// Default operation.
    #[serde(default)]
    pub operation: Option<Operation>,

    /// Default time-to-live in milliseconds.
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Default logical database index.
    #[serde(default)]
    pub database: Option<u32>,

    /// Buffer items until flush instead of sending each one on add.
    #[serde(default = "default_send_in_batch")]
    pub send_in_batch: bool,

    /// Send multi-item flushes as one transaction.
    #[serde(default = "default_send_in_transaction")]
    pub send_in_transaction: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            key: None,
            connection: None,
            operation: None,
            ttl_ms: None,
            database: None,
            send_in_batch: default_send_in_batch(),
            send_in_transaction: default_send_in_transaction(),
        }
    }
}

impl ProviderConfig {
    /// Time-to-live as a duration.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Declaration-level configuration for one output binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationConfig {
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub connection: Option<String>,

    #[serde(default)]
    pub operation: Option<Operation>,

    #[serde(default)]
    pub ttl_ms: Option<u64>,

    #[serde(default)]
    pub database: Option<u32>,

    /// Overrides the provider's `send_in_batch` when set.
    #[serde(default)]
    pub send_in_batch: Option<bool>,

    /// Overrides the provider's `send_in_transaction` when set.
    #[serde(default)]
    pub send_in_transaction: Option<bool>,
}

impl DeclarationConfig {
    /// Time-to-live as a duration.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_send_in_batch() -> bool {
    true
}

fn default_send_in_transaction() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SinkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: SinkConfig =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SinkConfig =
            toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a declaration by name.
    pub fn declaration(&self, name: &str) -> Result<&DeclarationConfig> {
        self.declarations
            .get(name)
            .with_context(|| format!("no declaration named '{}'", name))
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref connection) = overrides.connection {
            self.provider.connection = Some(connection.clone());
        }
        if let Some(send_in_batch) = overrides.send_in_batch {
            self.provider.send_in_batch = send_in_batch;
        }
        if let Some(send_in_transaction) = overrides.send_in_transaction {
            self.provider.send_in_transaction = send_in_transaction;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_telemetry()?;
        self.validate_layer(
            "provider",
            self.provider.connection.as_deref(),
            self.provider.ttl_ms,
            self.provider.database,
        )?;
        for (name, declaration) in &self.declarations {
            if name.is_empty() {
                anyhow::bail!("declaration names must not be empty");
            }
            self.validate_layer(
                &format!("declarations.{}", name),
                declaration.connection.as_deref(),
                declaration.ttl_ms,
                declaration.database,
            )?;
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_layer(
        &self,
        prefix: &str,
        connection: Option<&str>,
        ttl_ms: Option<u64>,
        database: Option<u32>,
    ) -> Result<()> {
        if let Some(connection) = connection.filter(|c| !c.is_empty()) {
            ConnectionAddress::parse(connection)
                .with_context(|| format!("{}.connection is invalid", prefix))?;
        }

        if ttl_ms == Some(0) {
            anyhow::bail!("{}.ttl_ms must be > 0 when set", prefix);
        }

        if let Some(database) = database {
            if database > MAX_DATABASE_INDEX {
                anyhow::bail!(
                    "{}.database must be <= {}, got: {}",
                    prefix,
                    MAX_DATABASE_INDEX,
                    database
                );
            }
        }

        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the provider connection identifier.
    pub connection: Option<String>,
    /// Override the provider batching flag.
    pub send_in_batch: Option<bool>,
    /// Override the provider transaction flag.
    pub send_in_transaction: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SinkConfig::from_toml("").unwrap();
        assert!(config.provider.send_in_batch);
        assert!(config.provider.send_in_transaction);
        assert!(config.provider.connection.is_none());
        assert!(config.declarations.is_empty());
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_parse_declarations() {
        let config = SinkConfig::from_toml(
            r#"
[provider]
connection = "redis://127.0.0.1:6379"
ttl_ms = 60000

[declarations.views]
key = "page-views"
operation = "increment"
send_in_transaction = false

[declarations.audit]
key = "audit-log"
operation = "listPushRight"
database = 2
"#,
        )
        .unwrap();

        let views = config.declaration("views").unwrap();
        assert_eq!(views.key.as_deref(), Some("page-views"));
        assert_eq!(views.operation, Some(Operation::Increment));
        assert_eq!(views.send_in_transaction, Some(false));

        let audit = config.declaration("audit").unwrap();
        assert_eq!(audit.operation, Some(Operation::ListPushRight));
        assert_eq!(audit.database, Some(2));

        assert_eq!(config.provider.ttl(), Some(Duration::from_secs(60)));
        assert!(config.declaration("missing").is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let result = SinkConfig::from_toml(
            r#"
[telemetry]
log_level = "verbose"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_database() {
        let result = SinkConfig::from_toml(
            r#"
[declarations.x]
database = 99
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = SinkConfig::from_toml(
            r#"
[provider]
ttl_ms = 0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_connection_rejected() {
        let result = SinkConfig::from_toml(
            r#"
[provider]
connection = "redis://host:notaport"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = SinkConfig::default();
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".into()),
            connection: Some("memory://test".into()),
            send_in_batch: Some(false),
            send_in_transaction: None,
        });
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.provider.connection.as_deref(), Some("memory://test"));
        assert!(!config.provider.send_in_batch);
        assert!(config.provider.send_in_transaction);
    }
}
