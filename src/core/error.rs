//! Error types for the sink.
//!
//! Every failure surfaced by `add`, `flush` or the connection registry is a
//! [`SinkError`]. Nothing is retried at this layer; callers decide.

use crate::backend::redis::RedisError;
use thiserror::Error;

/// Common sink error conditions.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A required field is empty after merging all configuration layers.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The backend connection could not be established or became unusable.
    #[error("connection '{connection_id}' unavailable: {message}")]
    Connection {
        connection_id: String,
        message: String,
    },

    /// The backend rejected an individual command.
    #[error("backend command failed: {0}")]
    Command(RedisError),

    /// The backend replied with something the client cannot interpret.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Sequential dispatch stopped because the flush was cancelled.
    #[error("flush cancelled after {dispatched} of {total} items")]
    Cancelled { dispatched: usize, total: usize },

    /// A structured payload could not be serialized.
    #[error("failed to serialize structured value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a Connection error.
    pub fn connection(connection_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            connection_id: connection_id.into(),
            message: message.into(),
        }
    }

    /// Create a Protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Check if this error is a configuration problem rather than a runtime one.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if a later attempt could plausibly succeed.
    ///
    /// Only advisory; the sink itself never retries.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Cancelled { .. } => true,
            Self::Command(e) => matches!(e.kind.as_str(), "BUSY" | "LOADING" | "TRYAGAIN"),
            _ => false,
        }
    }
}

impl From<RedisError> for SinkError {
    fn from(error: RedisError) -> Self {
        Self::Command(error)
    }
}

/// Result type using SinkError.
pub type SinkResult<T> = Result<T, SinkError>;
