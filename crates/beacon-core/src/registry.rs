//! Connection registry.
//!
//! Owns every live [`Socket`], keyed by its identifier.

use crate::hub::HubError;
use crate::socket::Socket;
use beacon_transport::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// The set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Socket>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateConnection`] if the identifier is taken.
    pub fn register(&self, socket: Arc<Socket>) -> Result<Arc<Socket>, HubError> {
        match self.connections.entry(socket.id().clone()) {
            Entry::Occupied(entry) => Err(HubError::DuplicateConnection(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&socket));
                debug!(
                    connection = %socket.id(),
                    transport = socket.transport().name(),
                    "Registered connection"
                );
                Ok(socket)
            }
        }
    }

    /// Remove a connection. `None` if it was already removed.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Arc<Socket>> {
        let removed = self.connections.remove(connection_id).map(|(_, socket)| socket);
        if removed.is_some() {
            debug!(connection = %connection_id, "Unregistered connection");
        }
        removed
    }

    /// Look up a live connection.
    #[must_use]
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<Arc<Socket>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Point-in-time snapshot of every connection.
    ///
    /// The returned list is detached from the registry: connections that
    /// register or unregister afterwards do not affect it.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Socket>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of every connection identifier.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// `true` when no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
