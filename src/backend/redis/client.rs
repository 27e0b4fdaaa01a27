//! RESP2 client over TCP.
//!
//! One [`RedisConnection`] owns at most one socket. Exchanges are serialized
//! through a session lock; the session is taken out of the lock for the
//! duration of an exchange and only put back once every reply was read, so
//! an exchange that fails or is dropped half way leaves no half-read socket
//! behind. The next exchange reconnects.

use super::options::RedisOptions;
use super::protocol::{ParseResult, Resp2Encoder, Resp2Parser};
use super::{RedisCommand, RedisError, RedisValue};
use crate::backend::{BackendFuture, Command, Connection, Database};
use crate::core::error::{SinkError, SinkResult};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A shared connection to one RESP server.
#[derive(Debug, Clone)]
pub struct RedisConnection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    connection_id: String,
    options: RedisOptions,
    session: Mutex<Option<Session>>,
}

#[derive(Debug)]
struct Session {
    stream: TcpStream,
    read_buf: BytesMut,
    parser: Resp2Parser,
    /// Database the server currently has selected for this socket.
    selected: u32,
}

impl RedisConnection {
    /// Connect, authenticate and verify the server answers PING.
    pub async fn connect(
        connection_id: impl Into<String>,
        options: RedisOptions,
    ) -> SinkResult<Self> {
        let connection_id = connection_id.into();
        let session = Session::open(&connection_id, &options).await?;

        tracing::info!(
            connection = %connection_id,
            addr = %options.addr(),
            default_database = options.default_database,
            "connected to redis"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                connection_id,
                options,
                session: Mutex::new(Some(session)),
            }),
        })
    }

    /// Handle for `index`, or the configured default database.
    pub fn database_handle(&self, index: Option<u32>) -> RedisDatabase {
        RedisDatabase {
            inner: Arc::clone(&self.inner),
            index: index.unwrap_or(self.inner.options.default_database),
        }
    }
}

impl Connection for RedisConnection {
    fn id(&self) -> &str {
        &self.inner.connection_id
    }

    fn database(&self, index: Option<u32>) -> Arc<dyn Database> {
        Arc::new(self.database_handle(index))
    }
}

/// A [`RedisConnection`] bound to one logical database.
#[derive(Debug, Clone)]
pub struct RedisDatabase {
    inner: Arc<Inner>,
    index: u32,
}

impl RedisDatabase {
    async fn transaction_inner(&self, commands: Vec<Command>) -> SinkResult<Vec<RedisValue>> {
        let count = commands.len();
        let mut wire = Vec::with_capacity(count + 2);
        wire.push(RedisCommand::new("MULTI", Vec::new()));
        wire.extend(commands.iter().map(Command::to_redis));
        wire.push(RedisCommand::new("EXEC", Vec::new()));

        let mut replies = self.inner.run(self.index, wire).await?.into_iter();

        match replies.next() {
            Some(reply) if reply.is_ok_status() => {}
            Some(RedisValue::Error(error)) => return Err(SinkError::Command(error)),
            other => {
                return Err(SinkError::protocol(format!(
                    "unexpected reply to MULTI: {:?}",
                    other
                )))
            }
        }

        // A command rejected while queuing makes the server discard the
        // whole transaction; report the first rejection.
        let mut rejected = None;
        for reply in replies.by_ref().take(count) {
            if let RedisValue::Error(error) = reply {
                rejected.get_or_insert(error);
            }
        }

        let exec = replies
            .next()
            .ok_or_else(|| SinkError::protocol("missing reply to EXEC"))?;

        if let Some(error) = rejected {
            return Err(SinkError::Command(error));
        }

        match exec {
            RedisValue::Array(results) if results.len() == count => Ok(results),
            RedisValue::Array(results) => Err(SinkError::protocol(format!(
                "EXEC returned {} replies for {} commands",
                results.len(),
                count
            ))),
            RedisValue::Null => Err(SinkError::Command(RedisError::execabort())),
            RedisValue::Error(error) => Err(SinkError::Command(error)),
            other => Err(SinkError::protocol(format!(
                "unexpected reply to EXEC: {:?}",
                other
            ))),
        }
    }
}

impl Database for RedisDatabase {
    fn index(&self) -> u32 {
        self.index
    }

    fn execute<'a>(&'a self, command: Command) -> BackendFuture<'a, RedisValue> {
        Box::pin(async move {
            self.inner
                .run(self.index, vec![command.to_redis()])
                .await?
                .pop()
                .ok_or_else(|| SinkError::protocol("missing reply"))
        })
    }

    fn pipeline<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>> {
        Box::pin(async move {
            if commands.is_empty() {
                return Ok(Vec::new());
            }
            let wire = commands.iter().map(Command::to_redis).collect();
            self.inner.run(self.index, wire).await
        })
    }

    fn transaction<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>> {
        Box::pin(async move {
            if commands.is_empty() {
                return Ok(Vec::new());
            }
            self.transaction_inner(commands).await
        })
    }
}

impl Inner {
    /// Send `commands` back to back on `database` and read one reply each.
    async fn run(&self, database: u32, commands: Vec<RedisCommand>) -> SinkResult<Vec<RedisValue>> {
        let mut guard = self.session.lock().await;

        let mut session = match guard.take() {
            Some(session) => session,
            None => {
                tracing::debug!(connection = %self.connection_id, "reconnecting to redis");
                Session::open(&self.connection_id, &self.options).await?
            }
        };

        if session.selected != database {
            let select = [RedisCommand::new(
                "SELECT",
                vec![Bytes::from(database.to_string())],
            )];
            let reply = self.timed_exchange(&mut session, &select).await?;
            if let Some(RedisValue::Error(error)) = reply.into_iter().next() {
                *guard = Some(session);
                return Err(SinkError::Command(error));
            }
            tracing::debug!(connection = %self.connection_id, database, "selected database");
            session.selected = database;
        }

        let replies = self.timed_exchange(&mut session, &commands).await?;
        *guard = Some(session);
        Ok(replies)
    }

    /// One exchange bounded by the response timeout. On error the caller
    /// drops the session.
    async fn timed_exchange(
        &self,
        session: &mut Session,
        commands: &[RedisCommand],
    ) -> SinkResult<Vec<RedisValue>> {
        let exchange = session.exchange(&self.connection_id, commands);
        match tokio::time::timeout(self.options.response_timeout, exchange).await {
            Ok(Ok(replies)) => Ok(replies),
            Ok(Err(e)) => {
                tracing::warn!(
                    connection = %self.connection_id,
                    error = %e,
                    "discarding redis session"
                );
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    connection = %self.connection_id,
                    timeout_ms = self.options.response_timeout.as_millis() as u64,
                    "redis reply timed out; discarding session"
                );
                Err(SinkError::connection(
                    &self.connection_id,
                    "timed out waiting for reply",
                ))
            }
        }
    }
}

impl Session {
    async fn open(connection_id: &str, options: &RedisOptions) -> SinkResult<Self> {
        let addr = options.addr();
        let stream = match tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SinkError::connection(
                    connection_id,
                    format!("failed to connect to {}: {}", addr, e),
                ))
            }
            Err(_) => {
                return Err(SinkError::connection(
                    connection_id,
                    format!("timed out connecting to {}", addr),
                ))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection = %connection_id, error = %e, "failed to set TCP_NODELAY");
        }

        let mut session = Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            parser: Resp2Parser::new(),
            selected: 0,
        };

        let mut handshake = Vec::new();
        if let Some(password) = &options.password {
            let mut args = Vec::new();
            if let Some(username) = &options.username {
                args.push(Bytes::from(username.clone()));
            }
            args.push(Bytes::from(password.clone()));
            handshake.push(RedisCommand::new("AUTH", args));
        }
        handshake.push(RedisCommand::new("PING", Vec::new()));

        let exchange = session.exchange(connection_id, &handshake);
        let replies = tokio::time::timeout(options.response_timeout, exchange)
            .await
            .map_err(|_| SinkError::connection(connection_id, "timed out during handshake"))??;

        for reply in replies {
            if let RedisValue::Error(error) = reply {
                return Err(SinkError::connection(
                    connection_id,
                    format!("handshake rejected: {}", error),
                ));
            }
        }

        Ok(session)
    }

    async fn exchange(
        &mut self,
        connection_id: &str,
        commands: &[RedisCommand],
    ) -> SinkResult<Vec<RedisValue>> {
        let mut out = Vec::new();
        for command in commands {
            Resp2Encoder::encode_command(command, &mut out);
        }
        self.stream
            .write_all(&out)
            .await
            .map_err(|e| SinkError::connection(connection_id, format!("write failed: {}", e)))?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply(connection_id).await?);
        }
        Ok(replies)
    }

    async fn read_reply(&mut self, connection_id: &str) -> SinkResult<RedisValue> {
        loop {
            match self.parser.parse(&self.read_buf) {
                ParseResult::Ok { value, consumed } => {
                    self.read_buf.advance(consumed);
                    return Ok(value);
                }
                ParseResult::Error(message) => return Err(SinkError::protocol(message)),
                ParseResult::Incomplete => {}
            }

            let read = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| SinkError::connection(connection_id, format!("read failed: {}", e)))?;
            if read == 0 {
                return Err(SinkError::connection(
                    connection_id,
                    "connection closed by server",
                ));
            }
        }
    }
}
