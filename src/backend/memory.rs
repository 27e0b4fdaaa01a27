//! In-process key-value store.
//!
//! Backs `memory://<name>` connection identifiers. Supports the command set
//! the sink issues (strings, integers, lists, expiry) with per-database
//! keyspaces and strictly atomic transactions. Expired keys are dropped
//! lazily when touched.

use super::{BackendFuture, Command, Connection, ConnectionAddress, Connector, Database};
use crate::backend::redis::{RedisError, RedisValue};
use crate::core::error::{SinkError, SinkResult};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Entry>;

/// Shared in-memory store with one keyspace per database index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<u32, Keyspace>>,
    applied: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command and return its reply.
    pub fn apply(&self, database: u32, command: &Command) -> RedisValue {
        let mut databases = self.databases.write();
        let keyspace = databases.entry(database).or_default();
        let reply = apply_to(keyspace, command, Instant::now());
        self.applied.fetch_add(1, Ordering::Relaxed);
        reply
    }

    /// Apply all commands under one lock, all or nothing.
    ///
    /// If any command is rejected, every key touched so far is restored and
    /// the rejection is returned.
    pub fn transaction(&self, database: u32, commands: &[Command]) -> SinkResult<Vec<RedisValue>> {
        let mut databases = self.databases.write();
        let keyspace = databases.entry(database).or_default();
        let now = Instant::now();

        let mut snapshot: Vec<(String, Option<Entry>)> = Vec::new();
        let mut replies = Vec::with_capacity(commands.len());

        for command in commands {
            let key = command.key();
            if !snapshot.iter().any(|(k, _)| k == key) {
                snapshot.push((key.to_string(), keyspace.get(key).cloned()));
            }

            match apply_to(keyspace, command, now) {
                RedisValue::Error(error) => {
                    for (key, previous) in snapshot {
                        match previous {
                            Some(entry) => keyspace.insert(key, entry),
                            None => keyspace.remove(&key),
                        };
                    }
                    tracing::debug!(
                        database,
                        command = command.name(),
                        error = %error,
                        "memory transaction rolled back"
                    );
                    return Err(SinkError::Command(error));
                }
                reply => replies.push(reply),
            }
        }

        self.applied
            .fetch_add(commands.len() as u64, Ordering::Relaxed);
        Ok(replies)
    }

    /// String value at key.
    pub fn get(&self, database: u32, key: &str) -> Option<Bytes> {
        match self.live(database, key)?.value {
            Value::String(bytes) => Some(bytes),
            Value::List(_) => None,
        }
    }

    /// Integer value at key.
    pub fn integer(&self, database: u32, key: &str) -> Option<i64> {
        let bytes = self.get(database, key)?;
        std::str::from_utf8(&bytes).ok()?.parse().ok()
    }

    /// List at key, head first.
    pub fn list(&self, database: u32, key: &str) -> Option<Vec<Bytes>> {
        match self.live(database, key)?.value {
            Value::List(items) => Some(items.into_iter().collect()),
            Value::String(_) => None,
        }
    }

    /// Remaining time to live at key.
    pub fn ttl(&self, database: u32, key: &str) -> Option<Duration> {
        let expires_at = self.live(database, key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn exists(&self, database: u32, key: &str) -> bool {
        self.live(database, key).is_some()
    }

    /// Number of live keys in a database.
    pub fn len(&self, database: u32) -> usize {
        let now = Instant::now();
        self.databases
            .read()
            .get(&database)
            .map(|keyspace| keyspace.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, database: u32) -> bool {
        self.len(database) == 0
    }

    /// Total commands applied, counting committed transactions only.
    pub fn commands_applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    fn live(&self, database: u32, key: &str) -> Option<Entry> {
        let databases = self.databases.read();
        let entry = databases.get(&database)?.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.clone())
    }
}

fn apply_to(keyspace: &mut Keyspace, command: &Command, now: Instant) -> RedisValue {
    let key = command.key();
    if keyspace.get(key).is_some_and(|e| e.is_expired(now)) {
        keyspace.remove(key);
    }

    match command {
        Command::Set { key, value, ttl } => {
            keyspace.insert(
                key.clone(),
                Entry {
                    value: Value::String(value.clone()),
                    // past the clock's range means never
                    expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                },
            );
            RedisValue::ok()
        }
        Command::Delete { key } => RedisValue::integer(keyspace.remove(key).is_some() as i64),
        Command::IncrBy { key, amount } => {
            let (current, expires_at) = match keyspace.get(key) {
                None => (0, None),
                Some(Entry {
                    value: Value::String(bytes),
                    expires_at,
                }) => match std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
                    Some(n) => (n, *expires_at),
                    None => return RedisValue::Error(RedisError::not_integer()),
                },
                Some(_) => return RedisValue::Error(RedisError::wrong_type()),
            };
            let Some(next) = current.checked_add(*amount) else {
                return RedisValue::Error(RedisError::overflow());
            };
            keyspace.insert(
                key.clone(),
                Entry {
                    value: Value::String(Bytes::from(next.to_string())),
                    expires_at,
                },
            );
            RedisValue::integer(next)
        }
        Command::RPush { key, value } | Command::LPush { key, value } => {
            let entry = keyspace.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            let Value::List(items) = &mut entry.value else {
                return RedisValue::Error(RedisError::wrong_type());
            };
            if matches!(command, Command::RPush { .. }) {
                items.push_back(value.clone());
            } else {
                items.push_front(value.clone());
            }
            RedisValue::integer(items.len() as i64)
        }
    }
}

/// A connection to a named in-process store.
#[derive(Debug)]
pub struct MemoryConnection {
    id: String,
    store: Arc<MemoryStore>,
}

impl MemoryConnection {
    pub fn new(id: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn database(&self, index: Option<u32>) -> Arc<dyn Database> {
        Arc::new(MemoryDatabase {
            store: Arc::clone(&self.store),
            index: index.unwrap_or(0),
        })
    }
}

/// Database handle over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    store: Arc<MemoryStore>,
    index: u32,
}

impl MemoryDatabase {
    pub fn new(store: Arc<MemoryStore>, index: u32) -> Self {
        Self { store, index }
    }
}

impl Database for MemoryDatabase {
    fn index(&self) -> u32 {
        self.index
    }

    fn execute<'a>(&'a self, command: Command) -> BackendFuture<'a, RedisValue> {
        Box::pin(async move { Ok(self.store.apply(self.index, &command)) })
    }

    fn pipeline<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>> {
        Box::pin(async move {
            Ok(commands
                .iter()
                .map(|command| self.store.apply(self.index, command))
                .collect())
        })
    }

    fn transaction<'a>(&'a self, commands: Vec<Command>) -> BackendFuture<'a, Vec<RedisValue>> {
        Box::pin(async move { self.store.transaction(self.index, &commands) })
    }
}

/// Connector for `memory://<name>` identifiers.
///
/// Identifiers naming the same store share it.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    established: AtomicUsize,
    connect_delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every connect.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// The store registered under `name`, created on first use.
    pub fn store(&self, name: &str) -> Arc<MemoryStore> {
        Arc::clone(self.stores.lock().entry(name.to_string()).or_default())
    }

    /// Number of connections established so far.
    pub fn established(&self) -> usize {
        self.established.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, connection_id: &'a str) -> BackendFuture<'a, Arc<dyn Connection>> {
        Box::pin(async move {
            let ConnectionAddress::Memory { name } = ConnectionAddress::parse(connection_id)? else {
                return Err(SinkError::configuration(format!(
                    "'{}' is not a memory:// identifier",
                    connection_id
                )));
            };

            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }

            self.established.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryConnection::new(connection_id, self.store(&name))) as Arc<dyn Connection>)
        })
    }
}
