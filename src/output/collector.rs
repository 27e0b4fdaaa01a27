//! Per-invocation output collector.
//!
//! A collector is bound to one declaration. Items are resolved against the
//! declaration and provider configuration as they are added. With batching
//! off each item is sent on `add`; otherwise items are buffered until
//! [`OutputCollector::flush`].

use crate::backend::{ConnectionRegistry, Database};
use crate::core::config::{DeclarationConfig, ProviderConfig};
use crate::core::error::SinkResult;
use crate::core::merge::{resolve_item, resolve_mode, resolve_target, DispatchMode};
use crate::output::dispatch::{Dispatcher, Strategy};
use crate::output::item::{OutputItem, ResolvedItem};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Collects output items for one invocation and delivers them.
#[derive(Debug)]
pub struct OutputCollector {
    provider: Arc<ProviderConfig>,
    declaration: DeclarationConfig,
    registry: Arc<ConnectionRegistry>,
    mode: DispatchMode,
    buffer: Vec<ResolvedItem>,
}

impl OutputCollector {
    pub fn new(
        provider: Arc<ProviderConfig>,
        declaration: DeclarationConfig,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let mode = resolve_mode(&declaration, &provider);
        Self {
            provider,
            declaration,
            registry,
            mode,
            buffer: Vec::new(),
        }
    }

    /// Resolve `item` and either send it now or buffer it.
    ///
    /// A key that is empty after resolution fails here, before anything is
    /// buffered or sent.
    pub async fn add(&mut self, item: &OutputItem) -> SinkResult<()> {
        let resolved = resolve_item(item, &self.declaration, &self.provider)?;

        if self.mode.send_in_batch {
            self.buffer.push(resolved);
            return Ok(());
        }

        let database = self.database().await?;
        Dispatcher::new(database.as_ref(), self.mode)
            .dispatch(std::slice::from_ref(&resolved), &CancellationToken::new())
            .await?;
        Ok(())
    }

    /// Deliver every buffered item.
    ///
    /// Returns the strategy used, or `None` when nothing was sent. The buffer
    /// is emptied whether or not delivery succeeds.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> SinkResult<Option<Strategy>> {
        if !self.mode.send_in_batch || self.buffer.is_empty() {
            return Ok(None);
        }

        let items = std::mem::take(&mut self.buffer);
        let database = self.database().await?;
        let strategy = Dispatcher::new(database.as_ref(), self.mode)
            .dispatch(&items, cancel)
            .await?;

        tracing::info!(
            items = items.len(),
            strategy = %strategy,
            database = database.index(),
            "flushed output items"
        );
        Ok(Some(strategy))
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    async fn database(&self) -> SinkResult<Arc<dyn Database>> {
        resolve_database(&self.declaration, &self.provider, &self.registry).await
    }
}

/// Database handle for a declaration, bypassing item collection.
pub async fn resolve_database(
    declaration: &DeclarationConfig,
    provider: &ProviderConfig,
    registry: &ConnectionRegistry,
) -> SinkResult<Arc<dyn Database>> {
    let target = resolve_target(declaration, provider)?;
    registry.database(&target.connection, target.database).await
}
