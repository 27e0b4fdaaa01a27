//! Key-value backends.
//!
//! The sink talks to storage through three small traits:
//!
//! - [`Connector`] turns a connection identifier into a live [`Connection`].
//! - [`Connection`] hands out [`Database`] handles; obtaining one does no I/O.
//! - [`Database`] executes [`Command`]s one at a time, as a pipeline, or as an
//!   atomic transaction.
//!
//! Replies come back as raw [`RedisValue`]s. An `Err` from a `Database`
//! method means the exchange itself failed (transport, protocol, aborted
//! transaction); a command the backend rejected shows up as
//! [`RedisValue::Error`] in the reply list.

pub mod memory;
pub mod redis;
pub mod registry;

use crate::core::error::{SinkError, SinkResult};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{MemoryConnection, MemoryConnector, MemoryDatabase, MemoryStore};
pub use redis::{RedisCommand, RedisError, RedisOptions, RedisValue};
pub use registry::ConnectionRegistry;

/// Scheme prefix for in-process stores.
pub const MEMORY_SCHEME: &str = "memory://";

/// Boxed future returned by backend trait methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = SinkResult<T>> + Send + 'a>>;

/// One storage command, independent of wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Overwrite the string at key, optionally expiring after `ttl`.
    Set {
        key: String,
        value: Bytes,
        ttl: Option<Duration>,
    },
    /// Remove key.
    Delete { key: String },
    /// Add `amount` to the integer at key.
    IncrBy { key: String, amount: i64 },
    /// Append to the list at key.
    RPush { key: String, value: Bytes },
    /// Prepend to the list at key.
    LPush { key: String, value: Bytes },
}

impl Command {
    /// Backend command name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::Delete { .. } => "DEL",
            Self::IncrBy { .. } => "INCRBY",
            Self::RPush { .. } => "RPUSH",
            Self::LPush { .. } => "LPUSH",
        }
    }

    /// Key the command touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::Delete { key }
            | Self::IncrBy { key, .. }
            | Self::RPush { key, .. }
            | Self::LPush { key, .. } => key,
        }
    }

    /// Wire form of the command.
    pub fn to_redis(&self) -> RedisCommand {
        let key = Bytes::from(self.key().to_string());
        let args = match self {
            Self::Set { value, ttl, .. } => {
                let mut args = vec![key, value.clone()];
                if let Some(ttl) = ttl {
                    // PX 0 is rejected by the server
                    let millis = ttl.as_millis().max(1);
                    args.push(Bytes::from_static(b"PX"));
                    args.push(Bytes::from(millis.to_string()));
                }
                args
            }
            Self::Delete { .. } => vec![key],
            Self::IncrBy { amount, .. } => vec![key, Bytes::from(amount.to_string())],
            Self::RPush { value, .. } | Self::LPush { value, .. } => vec![key, value.clone()],
        };
        RedisCommand::new(self.name(), args)
    }
}

/// A handle bound to one logical database.
pub trait Database: Send + Sync {
    /// Logical database index this handle targets.
    fn index(&self) -> u32;

    /// Execute a single command and return its reply.
    fn execute<'a>(&'a self, command: Command) -> BackendFuture<'a, RedisValue>;

    /// Send all commands without waiting between them and return one reply
    /// per command, in order. Commands are applied independently.
    fn pipeline<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>>;

    /// Apply all commands atomically and return one reply per command.
    ///
    /// Returns `Err` when the backend discarded the transaction, in which
    /// case none of the commands took effect.
    fn transaction<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>>;
}

/// An established, shareable connection.
pub trait Connection: Send + Sync {
    /// Identifier the connection was established from.
    fn id(&self) -> &str;

    /// Database handle for `index`, or the connection's default database.
    fn database(&self, index: Option<u32>) -> Arc<dyn Database>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id()).finish()
    }
}

/// Establishes connections from identifiers.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, connection_id: &'a str) -> BackendFuture<'a, Arc<dyn Connection>>;
}

/// Parsed connection identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddress {
    /// `memory://<name>`: a named in-process store.
    Memory { name: String },
    /// Anything else: a RESP server.
    Redis(RedisOptions),
}

impl ConnectionAddress {
    pub fn parse(connection_id: &str) -> SinkResult<Self> {
        match connection_id.trim().strip_prefix(MEMORY_SCHEME) {
            Some("") => Err(SinkError::configuration(
                "memory connection identifier needs a store name",
            )),
            Some(name) => Ok(Self::Memory {
                name: name.to_string(),
            }),
            None => Ok(Self::Redis(RedisOptions::parse(connection_id)?)),
        }
    }
}

/// Connector used by the process-wide registry: RESP servers over TCP and
/// named in-process stores.
#[derive(Debug, Default)]
pub struct DefaultConnector {
    memory: MemoryConnector,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for DefaultConnector {
    fn connect<'a>(&'a self, connection_id: &'a str) -> BackendFuture<'a, Arc<dyn Connection>> {
        Box::pin(async move {
            match ConnectionAddress::parse(connection_id)? {
                ConnectionAddress::Memory { .. } => self.memory.connect(connection_id).await,
                ConnectionAddress::Redis(options) => {
                    let connection =
                        redis::RedisConnection::connect(connection_id, options).await?;
                    Ok(Arc::new(connection) as Arc<dyn Connection>)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_to_redis() {
        let set = Command::Set {
            key: "k".to_string(),
            value: Bytes::from("v"),
            ttl: Some(Duration::from_secs(2)),
        };
        let wire = set.to_redis();
        assert_eq!(wire.name, "SET");
        assert_eq!(wire.arg_str(0), Some("k"));
        assert_eq!(wire.arg_str(2), Some("PX"));
        assert_eq!(wire.arg_int(3), Some(2000));

        let incr = Command::IncrBy {
            key: "n".to_string(),
            amount: -3,
        };
        assert_eq!(incr.to_redis().arg_int(1), Some(-3));

        let del = Command::Delete {
            key: "gone".to_string(),
        };
        assert_eq!(del.to_redis().name, "DEL");
        assert_eq!(del.to_redis().argc(), 1);
    }

    #[test]
    fn test_set_without_ttl_has_no_expiry_args() {
        let set = Command::Set {
            key: "k".to_string(),
            value: Bytes::from("v"),
            ttl: None,
        };
        assert_eq!(set.to_redis().argc(), 2);
    }

    #[test]
    fn test_sub_millisecond_ttl_rounds_up() {
        let set = Command::Set {
            key: "k".to_string(),
            value: Bytes::new(),
            ttl: Some(Duration::from_micros(10)),
        };
        assert_eq!(set.to_redis().arg_int(3), Some(1));
    }

    #[test]
    fn test_parse_connection_address() {
        assert_eq!(
            ConnectionAddress::parse("memory://cache").unwrap(),
            ConnectionAddress::Memory {
                name: "cache".to_string()
            }
        );
        assert!(matches!(
            ConnectionAddress::parse("localhost:6379").unwrap(),
            ConnectionAddress::Redis(_)
        ));
        assert!(ConnectionAddress::parse("memory://").is_err());
        assert!(ConnectionAddress::parse("").is_err());
    }
}
