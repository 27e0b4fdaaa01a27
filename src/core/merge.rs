//! Layered configuration merge.
//!
//! Every effective value is chosen from three layers, most specific first:
//!
//! | Layer | Source | Wins when |
//! |-------|--------|-----------|
//! | 1 | output item | non-empty / present |
//! | 2 | declaration (binding) | layer 1 absent |
//! | 3 | provider (global) | layers 1-2 absent |
//! | - | type default | all absent |
//!
//! All functions here are pure. [`resolve_item`] never mutates its input; it
//! returns a new [`ResolvedItem`].

use crate::core::config::{DeclarationConfig, ProviderConfig};
use crate::core::error::{SinkError, SinkResult};
use crate::output::item::{Operation, OutputItem, ResolvedItem};

/// First non-empty string among the layers, else the empty string.
pub fn merge_str(item: Option<&str>, declaration: Option<&str>, provider: Option<&str>) -> String {
    [item, declaration, provider]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// First present value among the layers.
pub fn merge_option<T>(item: Option<T>, declaration: Option<T>, provider: Option<T>) -> Option<T> {
    item.or(declaration).or(provider)
}

/// First set operation among the layers, else [`Operation::SetValue`].
pub fn merge_operation(
    item: Option<Operation>,
    declaration: Option<Operation>,
    provider: Option<Operation>,
) -> Operation {
    merge_option(item, declaration, provider).unwrap_or_default()
}

/// Where a collector's items are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    /// Connection identifier handed to the registry.
    pub connection: String,
    /// Logical database index; `None` uses the connection's default.
    pub database: Option<u32>,
}

/// How a collector delivers its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchMode {
    /// Buffer until flush instead of sending on every add.
    pub send_in_batch: bool,
    /// Wrap multi-item flushes in a transaction instead of a pipeline.
    pub send_in_transaction: bool,
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self {
            send_in_batch: true,
            send_in_transaction: true,
        }
    }
}

/// Resolve one output item against the declaration and provider layers.
///
/// Fails with a configuration error when no layer supplies a key, so a
/// malformed item never reaches the backend.
pub fn resolve_item(
    item: &OutputItem,
    declaration: &DeclarationConfig,
    provider: &ProviderConfig,
) -> SinkResult<ResolvedItem> {
    let key = merge_str(
        item.key.as_deref(),
        declaration.key.as_deref(),
        provider.key.as_deref(),
    );
    if key.is_empty() {
        return Err(SinkError::configuration(
            "key is empty after merging item, declaration and provider configuration",
        ));
    }

    Ok(ResolvedItem {
        key,
        value: item.value.clone(),
        operation: merge_operation(item.operation, declaration.operation, provider.operation),
        ttl: merge_option(item.ttl, declaration.ttl(), provider.ttl()),
        increment_amount: item.increment_amount,
    })
}

/// Resolve the connection identifier and database index.
///
/// Items carry no connection of their own; a flush always targets one
/// database handle.
pub fn resolve_target(
    declaration: &DeclarationConfig,
    provider: &ProviderConfig,
) -> SinkResult<DispatchTarget> {
    let connection = merge_str(
        None,
        declaration.connection.as_deref(),
        provider.connection.as_deref(),
    );
    if connection.is_empty() {
        return Err(SinkError::configuration(
            "connection is empty after merging declaration and provider configuration",
        ));
    }

    Ok(DispatchTarget {
        connection,
        database: merge_option(None, declaration.database, provider.database),
    })
}

/// Resolve the batching flags. There is no item-level override.
pub fn resolve_mode(declaration: &DeclarationConfig, provider: &ProviderConfig) -> DispatchMode {
    DispatchMode {
        send_in_batch: declaration.send_in_batch.unwrap_or(provider.send_in_batch),
        send_in_transaction: declaration
            .send_in_transaction
            .unwrap_or(provider.send_in_transaction),
    }
}
