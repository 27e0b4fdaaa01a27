//! Redis RESP2 client backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RedisConnection (shared)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RedisDatabase handles (one per database index, no I/O)     │
//! │    ↓                                                        │
//! │  Session lock (one exchange on the wire at a time)          │
//! │    ├── SELECT when the handle's index differs               │
//! │    ├── single command        → 1 reply                      │
//! │    ├── pipeline of N         → N replies                    │
//! │    └── MULTI, N, EXEC        → OK, N × QUEUED, EXEC array   │
//! │    ↓                                                        │
//! │  RESP2 encoder / parser over TcpStream                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod options;
pub mod protocol;

use bytes::Bytes;

pub use client::{RedisConnection, RedisDatabase};
pub use options::RedisOptions;

/// RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RedisValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),

    /// Error (-ERR message\r\n)
    Error(RedisError),

    /// Integer (:1000\r\n)
    Integer(i64),

    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Bytes),

    /// Array (*2\r\n...)
    Array(Vec<RedisValue>),

    /// Null ($-1\r\n or *-1\r\n)
    Null,
}

impl RedisValue {
    /// Create an OK response.
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    /// Create an error.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(RedisError::new(kind, message))
    }

    /// Create an integer.
    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// Check if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if this is the `+OK` status.
    pub fn is_ok_status(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }
}

/// Error reply from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisError {
    /// Error kind (ERR, WRONGTYPE, EXECABORT, etc.)
    pub kind: String,
    /// Error message.
    pub message: String,
}

impl RedisError {
    /// Create a new error.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a WRONGTYPE error.
    pub fn wrong_type() -> Self {
        Self::new(
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value",
        )
    }

    /// Create a not-an-integer error.
    pub fn not_integer() -> Self {
        Self::new("ERR", "value is not an integer or out of range")
    }

    /// Create an overflow error.
    pub fn overflow() -> Self {
        Self::new("ERR", "increment or decrement would overflow")
    }

    /// Create an EXECABORT error.
    pub fn execabort() -> Self {
        Self::new(
            "EXECABORT",
            "Transaction discarded because of previous errors",
        )
    }
}

impl std::fmt::Display for RedisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.message)
    }
}

impl std::error::Error for RedisError {}

/// A command in wire form: name plus binary-safe arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisCommand {
    /// Command name (uppercase).
    pub name: String,

    /// Command arguments.
    pub args: Vec<Bytes>,
}

impl RedisCommand {
    /// Create a new command.
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            args,
        }
    }

    /// Get argument as string.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Get argument as integer.
    pub fn arg_int(&self, index: usize) -> Option<i64> {
        self.arg_str(index).and_then(|s| s.parse().ok())
    }

    /// Get number of arguments.
    pub fn argc(&self) -> usize {
        self.args.len()
    }
}
