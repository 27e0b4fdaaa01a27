//! Process-wide connection registry.
//!
//! Maps connection identifiers to established connections. The first caller
//! for an identifier establishes the connection; concurrent callers for the
//! same identifier wait on that attempt and receive its outcome, success or
//! failure. A failed attempt leaves nothing cached, so the next caller tries
//! again. Established identifiers are never evicted.

use super::{Connection, Connector, Database, DefaultConnector};
use crate::core::error::{SinkError, SinkResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Outcome of an establishment attempt, `None` while it is in flight.
type Outcome = Option<Result<Arc<dyn Connection>, Arc<SinkError>>>;

enum Slot {
    Ready(Arc<dyn Connection>),
    Connecting(watch::Receiver<Outcome>),
}

enum Lookup {
    Ready(Arc<dyn Connection>),
    Wait(watch::Receiver<Outcome>),
    Establish(watch::Sender<Outcome>),
}

/// Lazily populated map from connection identifier to connection.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Registry shared by every collector in the process.
    pub fn global() -> Arc<ConnectionRegistry> {
        static GLOBAL: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();
        Arc::clone(
            GLOBAL.get_or_init(|| Arc::new(ConnectionRegistry::new(Arc::new(DefaultConnector::new())))),
        )
    }

    /// The connection for `connection_id`, establishing it on first use.
    ///
    /// Callers arriving while an attempt is in flight share its outcome. If
    /// the establishing caller is dropped mid-attempt, a waiter takes over.
    pub async fn connection(&self, connection_id: &str) -> SinkResult<Arc<dyn Connection>> {
        loop {
            let lookup = {
                let mut connections = self.connections.lock();
                match connections.get(connection_id) {
                    Some(Slot::Ready(connection)) => Lookup::Ready(Arc::clone(connection)),
                    Some(Slot::Connecting(pending)) => Lookup::Wait(pending.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        connections.insert(connection_id.to_string(), Slot::Connecting(rx));
                        Lookup::Establish(tx)
                    }
                }
            };

            match lookup {
                Lookup::Ready(connection) => return Ok(connection),
                Lookup::Establish(tx) => return self.establish(connection_id, tx).await,
                Lookup::Wait(mut pending) => {
                    let outcome = pending
                        .wait_for(Option::is_some)
                        .await
                        .map(|outcome| outcome.clone());
                    match outcome {
                        Ok(Some(Ok(connection))) => return Ok(connection),
                        Ok(Some(Err(e))) => return Err(shared_failure(connection_id, &e)),
                        // abandoned attempt; its slot is already gone
                        Ok(None) | Err(_) => continue,
                    }
                }
            }
        }
    }

    async fn establish(
        &self,
        connection_id: &str,
        tx: watch::Sender<Outcome>,
    ) -> SinkResult<Arc<dyn Connection>> {
        let mut pending = PendingSlot {
            connections: &self.connections,
            connection_id,
            armed: true,
        };

        tracing::info!(connection = %connection_id, "establishing connection");
        let result = self.connector.connect(connection_id).await;
        pending.armed = false;

        match result {
            Ok(connection) => {
                self.connections.lock().insert(
                    connection_id.to_string(),
                    Slot::Ready(Arc::clone(&connection)),
                );
                tx.send_replace(Some(Ok(Arc::clone(&connection))));
                Ok(connection)
            }
            Err(e) => {
                tracing::warn!(
                    connection = %connection_id,
                    error = %e,
                    "connection attempt failed"
                );
                self.connections.lock().remove(connection_id);
                tx.send_replace(Some(Err(Arc::new(shared_failure(connection_id, &e)))));
                Err(e)
            }
        }
    }

    /// Database handle on the connection for `connection_id`.
    pub async fn database(
        &self,
        connection_id: &str,
        index: Option<u32>,
    ) -> SinkResult<Arc<dyn Database>> {
        Ok(self.connection(connection_id).await?.database(index))
    }

    /// Number of identifiers with an established connection.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes an in-flight slot whose establishing caller was dropped.
struct PendingSlot<'a> {
    connections: &'a Mutex<HashMap<String, Slot>>,
    connection_id: &'a str,
    armed: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connections.lock().remove(self.connection_id);
        }
    }
}

/// Copy of an establishment failure for a caller that waited on it.
fn shared_failure(connection_id: &str, error: &SinkError) -> SinkError {
    match error {
        SinkError::Configuration { message } => SinkError::configuration(message.clone()),
        SinkError::Connection {
            connection_id,
            message,
        } => SinkError::connection(connection_id.clone(), message.clone()),
        other => SinkError::connection(connection_id, other.to_string()),
    }
}
