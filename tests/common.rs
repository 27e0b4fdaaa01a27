//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use kvsink::backend::redis::protocol::{ParseResult, Resp2Encoder, Resp2Parser};
use kvsink::backend::{
    Command, ConnectionRegistry, MemoryConnector, MemoryStore, RedisCommand, RedisError,
    RedisValue,
};
use kvsink::core::config::{DeclarationConfig, ProviderConfig};
use kvsink::output::OutputCollector;
use parking_lot::Mutex;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Dispatch modes that buffer more than one item: (name, batch, transaction).
pub const BATCH_MODES: [(&str, bool, bool); 3] = [
    ("sequential", false, false),
    ("pipelined", true, false),
    ("transactional", true, true),
];

/// Keys with this prefix are rejected by [`TestServer`] while queuing.
pub const POISON_PREFIX: &str = "poison:";

/// Write `content` to a temp config file.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with one declaration.
pub fn create_config_with_declaration(
    connection: &str,
    declaration: &str,
    key: &str,
    operation: &str,
) -> NamedTempFile {
    create_config(&format!(
        r#"
[provider]
connection = "{}"

[declarations.{}]
key = "{}"
operation = "{}"

[telemetry]
log_level = "debug"
"#,
        connection, declaration, key, operation
    ))
}

/// Provider layer pointing at `connection` with the given dispatch flags.
pub fn provider(connection: &str, send_in_batch: bool, send_in_transaction: bool) -> ProviderConfig {
    ProviderConfig {
        connection: Some(connection.to_string()),
        send_in_batch,
        send_in_transaction,
        ..Default::default()
    }
}

/// Registry over a fresh memory connector.
pub fn memory_registry() -> (Arc<MemoryConnector>, Arc<ConnectionRegistry>) {
    let connector = Arc::new(MemoryConnector::new());
    let registry = Arc::new(ConnectionRegistry::new(connector.clone()));
    (connector, registry)
}

/// Collector bound to `declaration` with a provider at `connection`.
pub fn collector(
    registry: &Arc<ConnectionRegistry>,
    connection: &str,
    send_in_batch: bool,
    send_in_transaction: bool,
    declaration: DeclarationConfig,
) -> OutputCollector {
    OutputCollector::new(
        Arc::new(provider(connection, send_in_batch, send_in_transaction)),
        declaration,
        Arc::clone(registry),
    )
}

// ============================================================================
// RESP test server
// ============================================================================

struct ServerState {
    store: Arc<MemoryStore>,
    password: Option<String>,
    accepted: AtomicUsize,
    commands: Mutex<Vec<String>>,
    drop_next: AtomicBool,
}

/// Minimal RESP2 server over a [`MemoryStore`].
///
/// Understands AUTH, PING, SELECT, MULTI, EXEC and the sink's write
/// commands. Records every command name it receives.
pub struct TestServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_password(None).await
    }

    pub async fn start_with_password(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to read local addr");

        let state = Arc::new(ServerState {
            store: Arc::new(MemoryStore::new()),
            password: password.map(str::to_string),
            accepted: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            drop_next: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self { addr, state }
    }

    /// Connection identifier in `host:port` form.
    pub fn connection_id(&self) -> String {
        self.addr.to_string()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.state.store
    }

    /// Number of accepted TCP connections.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Names of every command received so far.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.state
            .commands
            .lock()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    pub fn clear_commands(&self) {
        self.state.commands.lock().clear();
    }

    /// Close the socket instead of answering the next command.
    pub fn drop_next_command(&self) {
        self.state.drop_next.store(true, Ordering::SeqCst);
    }
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

struct ClientSession {
    database: u32,
    authenticated: bool,
    queue: Option<Vec<Command>>,
    dirty: bool,
}

async fn serve(mut socket: TcpStream, state: Arc<ServerState>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut parser = Resp2Parser::new();
    let mut session = ClientSession {
        database: 0,
        authenticated: state.password.is_none(),
        queue: None,
        dirty: false,
    };

    loop {
        loop {
            match parser.parse(&buf) {
                ParseResult::Ok { value, consumed } => {
                    buf.advance(consumed);
                    let command = parse_request(value);
                    let reply = match command {
                        Ok(command) => {
                            state.commands.lock().push(command.name.clone());
                            if state.drop_next.swap(false, Ordering::SeqCst) {
                                return;
                            }
                            handle(&state, &mut session, command)
                        }
                        Err(e) => RedisValue::Error(e),
                    };
                    if socket.write_all(&Resp2Encoder::encode(&reply)).await.is_err() {
                        return;
                    }
                }
                ParseResult::Incomplete => break,
                ParseResult::Error(_) => return,
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn handle(state: &ServerState, session: &mut ClientSession, command: RedisCommand) -> RedisValue {
    match command.name.as_str() {
        "AUTH" => {
            let given = command.args.last().map(|b| String::from_utf8_lossy(b).to_string());
            if state.password.is_none() || given == state.password {
                session.authenticated = true;
                RedisValue::ok()
            } else {
                RedisValue::error("WRONGPASS", "invalid username-password pair")
            }
        }
        _ if !session.authenticated => RedisValue::error("NOAUTH", "Authentication required."),
        "PING" => RedisValue::SimpleString("PONG".to_string()),
        "SELECT" => match command.arg_int(0) {
            Some(index) if (0..16).contains(&index) => {
                session.database = index as u32;
                RedisValue::ok()
            }
            _ => RedisValue::error("ERR", "DB index is out of range"),
        },
        "MULTI" => {
            if session.queue.is_some() {
                return RedisValue::error("ERR", "MULTI calls can not be nested");
            }
            session.queue = Some(Vec::new());
            session.dirty = false;
            RedisValue::ok()
        }
        "EXEC" => match session.queue.take() {
            None => RedisValue::error("ERR", "EXEC without MULTI"),
            Some(_) if session.dirty => RedisValue::Error(RedisError::execabort()),
            Some(queued) => RedisValue::Array(
                queued
                    .iter()
                    .map(|c| state.store.apply(session.database, c))
                    .collect(),
            ),
        },
        _ => match to_command(&command) {
            Ok(parsed) => match session.queue.as_mut() {
                Some(queue) => {
                    queue.push(parsed);
                    RedisValue::SimpleString("QUEUED".to_string())
                }
                None => state.store.apply(session.database, &parsed),
            },
            Err(e) => {
                if session.queue.is_some() {
                    session.dirty = true;
                }
                RedisValue::Error(e)
            }
        },
    }
}

fn syntax_error() -> RedisError {
    RedisError::new("ERR", "syntax error")
}

/// Request array to command: bulk-string name, then bulk-string arguments.
fn parse_request(value: RedisValue) -> Result<RedisCommand, RedisError> {
    let RedisValue::Array(values) = value else {
        return Err(syntax_error());
    };
    let mut parts = values.into_iter().map(|v| match v {
        RedisValue::BulkString(b) => Ok(b),
        _ => Err(syntax_error()),
    });
    let name = parts.next().ok_or_else(syntax_error)??;
    let name = String::from_utf8(name.to_vec()).map_err(|_| syntax_error())?;
    let args = parts.collect::<Result<Vec<_>, _>>()?;
    Ok(RedisCommand::new(name, args))
}

fn require_args(command: &RedisCommand, n: usize) -> Result<(), RedisError> {
    if command.argc() < n {
        return Err(RedisError::new(
            "ERR",
            format!("wrong number of arguments for '{}' command", command.name),
        ));
    }
    Ok(())
}

fn to_command(command: &RedisCommand) -> Result<Command, RedisError> {
    require_args(command, 1)?;
    let key = command.arg_str(0).ok_or_else(syntax_error)?.to_string();
    if key.starts_with(POISON_PREFIX) {
        return Err(RedisError::new("ERR", format!("key '{}' is poisoned", key)));
    }

    match command.name.as_str() {
        "SET" => {
            require_args(command, 2)?;
            let ttl = match command.arg_str(2) {
                None => None,
                Some(opt) if opt.eq_ignore_ascii_case("PX") => {
                    let ms = command
                        .arg_int(3)
                        .filter(|ms| *ms > 0)
                        .ok_or_else(RedisError::not_integer)?;
                    Some(Duration::from_millis(ms as u64))
                }
                Some(_) => return Err(syntax_error()),
            };
            Ok(Command::Set {
                key,
                value: command.args[1].clone(),
                ttl,
            })
        }
        "DEL" => Ok(Command::Delete { key }),
        "INCRBY" => Ok(Command::IncrBy {
            key,
            amount: command.arg_int(1).ok_or_else(RedisError::not_integer)?,
        }),
        "RPUSH" => {
            require_args(command, 2)?;
            Ok(Command::RPush {
                key,
                value: command.args[1].clone(),
            })
        }
        "LPUSH" => {
            require_args(command, 2)?;
            Ok(Command::LPush {
                key,
                value: command.args[1].clone(),
            })
        }
        other => Err(RedisError::new("ERR", format!("unknown command '{}'", other))),
    }
}
