//! Flush dispatch.
//!
//! A flush picks exactly one strategy from the item count and the dispatch
//! mode:
//!
//! | Items | Batch | Transaction | Strategy |
//! |-------|-------|-------------|----------|
//! | 0-1 | any | any | [`Strategy::Direct`] |
//! | 2+ | off | any | [`Strategy::Sequential`] |
//! | 2+ | on | off | [`Strategy::Pipelined`] |
//! | 2+ | on | on | [`Strategy::Transactional`] |
//!
//! Every item is encoded before anything is sent, so an encoding failure
//! never leaves a flush half applied. Commands go out in item order in every
//! strategy.

use crate::backend::{Command, Database, RedisValue};
use crate::core::error::{SinkError, SinkResult};
use crate::core::merge::DispatchMode;
use crate::output::item::{encode_value, Operation, ResolvedItem};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// How one flush reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One round trip for a single item.
    Direct,
    /// One round trip per item, cancellable between items.
    Sequential,
    /// All commands written, then all replies awaited. Not atomic.
    Pipelined,
    /// All commands applied atomically.
    Transactional,
}

impl Strategy {
    pub fn select(len: usize, mode: DispatchMode) -> Self {
        if len <= 1 {
            Self::Direct
        } else if !mode.send_in_batch {
            Self::Sequential
        } else if !mode.send_in_transaction {
            Self::Pipelined
        } else {
            Self::Transactional
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Sequential => write!(f, "sequential"),
            Self::Pipelined => write!(f, "pipelined"),
            Self::Transactional => write!(f, "transactional"),
        }
    }
}

/// Backend command for a resolved item.
///
/// `SetValue` without a payload deletes the key. Only `SetValue` applies
/// the ttl.
pub fn to_command(item: &ResolvedItem) -> SinkResult<Command> {
    let key = item.key.clone();
    let value = encode_value(item.value.as_ref())?;

    Ok(match item.operation {
        Operation::SetValue => match value {
            Some(value) => Command::Set {
                key,
                value,
                ttl: item.ttl,
            },
            None => Command::Delete { key },
        },
        Operation::Increment => Command::IncrBy {
            key,
            amount: item.increment_amount,
        },
        Operation::ListPushRight => Command::RPush {
            key,
            value: value.unwrap_or_else(Bytes::new),
        },
        Operation::ListPushLeft => Command::LPush {
            key,
            value: value.unwrap_or_else(Bytes::new),
        },
    })
}

/// Sends resolved items to one database handle.
pub struct Dispatcher<'a> {
    database: &'a dyn Database,
    mode: DispatchMode,
}

impl<'a> Dispatcher<'a> {
    pub fn new(database: &'a dyn Database, mode: DispatchMode) -> Self {
        Self { database, mode }
    }

    /// Dispatch `items` and return the strategy used.
    ///
    /// The first backend rejection fails the whole dispatch. Effects already
    /// applied by sequential or pipelined dispatch are not undone.
    pub async fn dispatch(
        &self,
        items: &[ResolvedItem],
        cancel: &CancellationToken,
    ) -> SinkResult<Strategy> {
        let commands = items.iter().map(to_command).collect::<SinkResult<Vec<_>>>()?;
        let total = commands.len();
        let strategy = Strategy::select(total, self.mode);

        tracing::debug!(
            items = total,
            strategy = %strategy,
            database = self.database.index(),
            "dispatching"
        );

        match strategy {
            Strategy::Direct => {
                if let Some(command) = commands.into_iter().next() {
                    check_reply(self.database.execute(command).await?)?;
                }
            }
            Strategy::Sequential => {
                for (dispatched, command) in commands.into_iter().enumerate() {
                    if cancel.is_cancelled() {
                        tracing::info!(dispatched, total, "sequential dispatch cancelled");
                        return Err(SinkError::Cancelled { dispatched, total });
                    }
                    check_reply(self.database.execute(command).await?)?;
                }
            }
            Strategy::Pipelined => {
                check_replies(self.database.pipeline(commands).await?, total)?;
            }
            Strategy::Transactional => {
                check_replies(self.database.transaction(commands).await?, total)?;
            }
        }

        Ok(strategy)
    }
}

fn check_reply(reply: RedisValue) -> SinkResult<()> {
    match reply {
        RedisValue::Error(error) => Err(SinkError::Command(error)),
        _ => Ok(()),
    }
}

fn check_replies(replies: Vec<RedisValue>, expected: usize) -> SinkResult<()> {
    if replies.len() != expected {
        return Err(SinkError::protocol(format!(
            "expected {} replies, got {}",
            expected,
            replies.len()
        )));
    }
    replies.into_iter().try_for_each(check_reply)
}
