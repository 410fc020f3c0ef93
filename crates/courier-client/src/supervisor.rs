//! The multi-connection supervisor.
//!
//! Owns an insertion-ordered pool of [`ClientConnection`]s keyed by
//! [`ConnectionId`]. Insertion order matters: it is the documented
//! tie-break for best-match routing, so the pool is a `Vec` rather than a
//! map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use courier_core::wire::CustomMessage;
use courier_core::{ConnectionId, CourierError, CustomHandler, CustomHandlerTable, Envelope};

use crate::config::ConnectionConfig;
use crate::connection::{ClientConnection, ConnectionState};
use crate::events::{ClientEvents, LogEvents};
use crate::select::{best_match, Candidate};

/// Point-in-time description of one pooled connection.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub url: String,
    pub api_key: String,
    pub platform: String,
    pub state: ConnectionState,
}

/// Supervises a pool of outbound connections and routes outgoing envelopes
/// onto the best match.
pub struct CourierClient {
    connections: RwLock<Vec<Arc<ClientConnection>>>,
    events: Arc<dyn ClientEvents>,
    custom: Arc<CustomHandlerTable>,
    stopped: AtomicBool,
}

impl CourierClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_events(Arc::new(LogEvents))
    }

    /// Build a supervisor with a custom event sink shared by every
    /// connection.
    #[must_use]
    pub fn with_events(events: Arc<dyn ClientEvents>) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            events,
            custom: Arc::new(CustomHandlerTable::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a handler for a custom message type (shared by every
    /// connection).
    pub fn register_custom_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn CustomHandler>,
    ) {
        self.custom.register(message_type, handler);
    }

    /// Remove a custom message handler.
    pub fn unregister_custom_handler(&self, message_type: &str) {
        self.custom.unregister(message_type);
    }

    /// Add a connection to the pool (state `Idle`). Returns its id.
    pub fn add_connection(&self, config: ConnectionConfig) -> Result<ConnectionId, CourierError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CourierError::Shutdown);
        }
        config.validate()?;
        let id = ConnectionId::new();
        let connection = Arc::new(ClientConnection::new(
            id.clone(),
            config,
            self.events.clone(),
            self.custom.clone(),
        ));
        self.connections.write().push(connection);
        debug!(%id, "connection added");
        Ok(id)
    }

    /// Convenience: add a connection from its coordinates.
    pub fn add_connection_to(
        &self,
        url: impl Into<String>,
        api_key: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<ConnectionId, CourierError> {
        self.add_connection(ConnectionConfig::new(url, api_key, platform))
    }

    /// Start the run loop of one connection (`Idle` → `Connecting`).
    pub fn connect_to(&self, id: &ConnectionId) -> bool {
        match self.find(id) {
            Some(connection) => connection.connect(),
            None => false,
        }
    }

    /// Start every idle connection. Returns how many were started.
    pub fn connect_all(&self) -> usize {
        let connections = self.connections.read().clone();
        connections
            .iter()
            .filter(|connection| connection.connect())
            .count()
    }

    /// Disconnect one connection, leaving it in the pool (`Idle`).
    pub async fn disconnect(&self, id: &ConnectionId) -> bool {
        match self.find(id) {
            Some(connection) => {
                connection.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Stop and remove one connection from the pool.
    pub async fn remove_connection(&self, id: &ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            let index = connections
                .iter()
                .position(|connection| connection.id() == id);
            index.map(|index| connections.remove(index))
        };
        match removed {
            Some(connection) => {
                connection.stop().await;
                debug!(%id, "connection removed");
                true
            }
            None => false,
        }
    }

    /// A handle to one pooled connection.
    #[must_use]
    pub fn find(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections
            .read()
            .iter()
            .find(|connection| connection.id() == id)
            .cloned()
    }

    /// Descriptions of every pooled connection, in insertion order.
    #[must_use]
    pub fn get_connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().iter().map(|c| info(c)).collect()
    }

    /// Descriptions of the `Connected` subset, in insertion order.
    #[must_use]
    pub fn get_active_connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .map(|c| info(c))
            .collect()
    }

    /// Route an envelope onto the best-matching connected socket.
    ///
    /// Priority: exact `(api_key, platform)`, then api_key, then platform,
    /// earliest-added breaking ties. Returns `false` when nothing matches
    /// or the chosen socket write fails; there is no retry on another
    /// connection (that would risk duplicate delivery).
    pub async fn send_message(&self, envelope: &Envelope) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("send_message after stop, dropping");
            return false;
        }

        // Snapshot the connected subset so selection cannot race pool
        // mutation.
        let active: Vec<Arc<ClientConnection>> = self
            .connections
            .read()
            .iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .cloned()
            .collect();

        let candidates: Vec<Candidate<'_>> = active
            .iter()
            .map(|c| Candidate {
                api_key: &c.config().api_key,
                platform: &c.config().platform,
            })
            .collect();

        let Some(index) = best_match(&candidates, envelope.api_key(), envelope.platform()) else {
            warn!(
                api_key = %envelope.api_key(),
                platform = %envelope.platform(),
                "no connection matches envelope target"
            );
            return false;
        };

        let chosen = &active[index];
        debug!(
            id = %chosen.id(),
            api_key = %envelope.api_key(),
            platform = %envelope.platform(),
            "routing envelope"
        );
        chosen.send_envelope(envelope).await
    }

    /// Send a custom message on the earliest-added connected socket.
    pub async fn send_custom_message(&self, message_type: &str, payload: Value) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("send_custom_message after stop, dropping");
            return false;
        }

        let first_connected = self
            .connections
            .read()
            .iter()
            .find(|c| c.state() == ConnectionState::Connected)
            .cloned();
        let Some(connection) = first_connected else {
            warn!(message_type, "no connected socket for custom message");
            return false;
        };

        let message = CustomMessage::new(message_type, payload);
        connection.send_custom(&message).await
    }

    /// Stop every connection and refuse further work.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let connections = self.connections.read().clone();
        for connection in connections {
            connection.stop().await;
        }
    }
}

impl Default for CourierClient {
    fn default() -> Self {
        Self::new()
    }
}

fn info(connection: &Arc<ClientConnection>) -> ConnectionInfo {
    ConnectionInfo {
        id: connection.id().clone(),
        url: connection.config().url.clone(),
        api_key: connection.config().api_key.clone(),
        platform: connection.config().platform.clone(),
        state: connection.state(),
    }
}
