//! kvsink - batched key-value output for Redis-compatible stores.
//!
//! Invocation code hands [`OutputItem`]s to an [`OutputCollector`] bound to
//! one declaration. Each item is resolved against the declaration and the
//! provider configuration, then either sent immediately or buffered and
//! delivered on flush as one direct call, a sequence, a pipeline or an
//! atomic transaction. Connections are shared process-wide through the
//! [`ConnectionRegistry`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Invocation code                           │
//! │                 add(item) ... flush(cancel)                     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       OutputCollector                           │
//! │      item → declaration → provider merge │ ordered buffer       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                              │
//! │     direct │ sequential │ pipelined │ transactional             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ConnectionRegistry                          │
//! │     single-flight connect per id │ cheap database handles       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Backends                               │
//! │          RESP2 client over TCP │ in-process memory store        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::merge`] - Layered configuration precedence
//! - [`core::error`] - Error types
//!
//! ## Output
//! - [`output::item`] - Output items, operations and value encoding
//! - [`output::collector`] - Per-invocation collector
//! - [`output::dispatch`] - Flush strategies
//!
//! ## Backends
//! - [`backend::registry`] - Process-wide connection registry
//! - [`backend::redis`] - RESP2 client
//! - [`backend::memory`] - In-process store
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations

// Core infrastructure
pub mod core;

// Output collection and dispatch
pub mod output;

// Storage backends
pub mod backend;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::config::{DeclarationConfig, ProviderConfig, SinkConfig};
pub use self::core::error::{SinkError, SinkResult};
pub use self::core::merge::DispatchMode;
pub use backend::{Command, Connection, ConnectionRegistry, Connector, Database};
pub use output::{resolve_database, Operation, OutputCollector, OutputItem, OutputValue, Strategy};
