//! Send command implementation.
//!
//! Builds one collector for a declaration, adds every item given on the
//! command line or in a file, and flushes. Ctrl-C cancels the flush.

use crate::backend::{ConnectionRegistry, MemoryConnector};
use crate::core::config::{ConfigOverrides, SinkConfig};
use crate::output::{OutputCollector, OutputItem};
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DRY_RUN_CONNECTION: &str = "memory://dry-run";

/// Send output items through a declaration.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Declaration to bind the collector to.
    #[arg(short, long)]
    pub declaration: String,

    /// Item as a JSON object; may be repeated.
    #[arg(long = "item", value_name = "JSON")]
    pub items: Vec<String>,

    /// File with one JSON item per line.
    #[arg(long, value_name = "PATH")]
    pub items_file: Option<PathBuf>,

    /// Fallback connection identifier when the declaration names none.
    #[arg(long)]
    pub connection: Option<String>,

    /// Override provider batching.
    #[arg(long)]
    pub send_in_batch: Option<bool>,

    /// Override provider transactions.
    #[arg(long)]
    pub send_in_transaction: Option<bool>,

    /// Deliver to an in-process store instead of the configured connection.
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the send command.
pub async fn run_send(config_path: &Path, log_level: Option<String>, args: SendArgs) -> Result<()> {
    let mut config = SinkConfig::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        connection: args.connection.clone(),
        send_in_batch: args.send_in_batch,
        send_in_transaction: args.send_in_transaction,
    });
    config.validate()?;

    init_tracing(&config.telemetry.log_level);

    let mut declaration = config.declaration(&args.declaration)?.clone();
    let database = declaration.database.or(config.provider.database).unwrap_or(0);
    let items = load_items(&args)?;
    if items.is_empty() {
        anyhow::bail!("no items given; use --item or --items-file");
    }

    let dry_run = args.dry_run.then(|| Arc::new(MemoryConnector::new()));
    let registry = match &dry_run {
        Some(connector) => {
            declaration.connection = Some(DRY_RUN_CONNECTION.to_string());
            Arc::new(ConnectionRegistry::new(connector.clone()))
        }
        None => ConnectionRegistry::global(),
    };

    let mut collector =
        OutputCollector::new(Arc::new(config.provider.clone()), declaration, registry);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling flush");
            watcher.cancel();
        }
    });

    for (index, item) in items.iter().enumerate() {
        collector
            .add(item)
            .await
            .with_context(|| format!("item {} rejected", index))?;
    }

    let strategy = collector.flush(&cancel).await.context("flush failed")?;

    match strategy {
        Some(strategy) => println!("✓ Sent {} item(s) ({})", items.len(), strategy),
        None => println!("✓ Sent {} item(s) (immediate)", items.len()),
    }

    if let Some(connector) = dry_run {
        let store = connector.store("dry-run");
        println!(
            "  dry run: {} command(s) applied, {} key(s) in store",
            store.commands_applied(),
            store.len(database)
        );
    }

    Ok(())
}

fn load_items(args: &SendArgs) -> Result<Vec<OutputItem>> {
    let mut items = Vec::new();

    for (index, json) in args.items.iter().enumerate() {
        let item = OutputItem::from_json(json)
            .with_context(|| format!("invalid --item #{}", index + 1))?;
        items.push(item);
    }

    if let Some(path) = &args.items_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read items file: {}", path.display()))?;
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let item = OutputItem::from_json(line).with_context(|| {
                format!("invalid item at {}:{}", path.display(), line_no + 1)
            })?;
            items.push(item);
        }
    }

    Ok(items)
}
