//! The hub: registry, rooms and routing behind one service object, plus the
//! lifecycle entry points the transport layer drives.
//!
//! ```text
//!   transport ──open──────▶ Hub::handle_open ──▶ registry + connection hook
//!             ──message───▶ Hub::handle_message ─▶ decode ─▶ socket handlers
//!             ──close─────▶ Hub::handle_close ──▶ "disconnect" ─▶ leave rooms ─▶ unregister
//!             ──error─────▶ Hub::handle_error (log only)
//! ```

use crate::dispatcher::panic_message;
use crate::registry::ConnectionRegistry;
use crate::room::RoomIndex;
use crate::router::BroadcastRouter;
use crate::socket::Socket;
use beacon_protocol::{
    close_code, codec, is_reserved, DisconnectReason, ProtocolError, CONNECTION_EVENT,
    DISCONNECT_EVENT,
};
use beacon_transport::{ConnectionId, Transport, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// A connection with this identifier is already registered.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// The connection is not (or no longer) registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Maximum number of live connections reached.
    #[error("Maximum connections reached ({0})")]
    ConnectionLimit(usize),

    /// Maximum rooms per connection reached.
    #[error("Maximum rooms per connection reached ({0})")]
    RoomLimit(usize),

    /// The hub has been shut down.
    #[error("Hub is shut down")]
    ShutDown,

    /// Envelope encoding or decoding failed.
    #[error("Protocol error: {0}")]
    Decode(#[from] ProtocolError),

    /// Writing to a transport failed.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] TransportError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_rooms_per_connection: 100,
        }
    }
}

/// Called once for every accepted connection, before its `connection` event.
pub type ConnectionHook = Arc<dyn Fn(&Socket) + Send + Sync>;

pub(crate) struct HubInner {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) rooms: RoomIndex,
    pub(crate) config: HubConfig,
    connection_hook: RwLock<Option<ConnectionHook>>,
    shut_down: AtomicBool,
}

impl HubInner {
    pub(crate) fn router(&self) -> BroadcastRouter<'_> {
        BroadcastRouter::new(&self.registry, &self.rooms)
    }
}

/// The realtime hub.
///
/// Cheap to clone; every clone refers to the same registry and room index.
/// Construct one at process start and hand clones to the transport layer and
/// to whoever needs to notify clients.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            inner: Arc::new(HubInner {
                registry: ConnectionRegistry::new(),
                rooms: RoomIndex::new(),
                config,
                connection_hook: RwLock::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HubInner>) -> Self {
        Self { inner }
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// The room index.
    #[must_use]
    pub fn rooms(&self) -> &RoomIndex {
        &self.inner.rooms
    }

    /// A broadcast router over this hub's tables.
    #[must_use]
    pub fn router(&self) -> BroadcastRouter<'_> {
        self.inner.router()
    }

    /// Set the hook that runs for every accepted connection.
    ///
    /// The hook typically attaches event handlers with [`Socket::on`]. Setting
    /// a new hook replaces the previous one.
    pub fn on_connection<F>(&self, hook: F)
    where
        F: Fn(&Socket) + Send + Sync + 'static,
    {
        *self
            .inner
            .connection_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Look up a live connection.
    #[must_use]
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<Arc<Socket>> {
        self.inner.registry.lookup(connection_id)
    }

    /// A transport accepted a new connection.
    ///
    /// Registers it under a fresh identifier, runs the connection hook and then
    /// fires the `connection` event carrying the identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is shut down or the connection limit is reached.
    pub fn handle_open(&self, transport: Arc<dyn Transport>) -> Result<Arc<Socket>, HubError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(HubError::ShutDown);
        }

        let limit = self.inner.config.max_connections;
        if self.inner.registry.len() >= limit {
            warn!(limit, "Rejecting connection: limit reached");
            return Err(HubError::ConnectionLimit(limit));
        }

        let socket = Arc::new(Socket::new(
            ConnectionId::generate(),
            transport,
            Arc::downgrade(&self.inner),
        ));
        let socket = self.inner.registry.register(socket)?;

        // Shutdown may have taken its snapshot between the check above and
        // the insert; close here so the socket cannot outlive it.
        if self.inner.shut_down.load(Ordering::SeqCst) {
            self.force_close(&socket);
            return Err(HubError::ShutDown);
        }

        debug!(
            connection = %socket.id(),
            remote = ?socket.transport().remote_addr(),
            "Connection opened"
        );

        let hook = self
            .inner
            .connection_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(&socket))) {
                warn!(
                    connection = %socket.id(),
                    panic = %panic_message(panic.as_ref()),
                    "Connection hook panicked"
                );
            }
        }

        socket.trigger(CONNECTION_EVENT, &Value::String(socket.id().to_string()));

        Ok(socket)
    }

    /// A transport received one text frame.
    ///
    /// Unknown connections and undecodable frames are logged and dropped.
    /// A client frame naming a reserved event is dispatched like any other.
    pub fn handle_message(&self, connection_id: &ConnectionId, text: &str) {
        let Some(socket) = self.inner.registry.lookup(connection_id) else {
            warn!(connection = %connection_id, "Message for unknown connection");
            return;
        };

        match codec::decode(text) {
            Ok(envelope) => {
                trace!(
                    connection = %connection_id,
                    event = %envelope.event,
                    reserved = is_reserved(&envelope.event),
                    "Received event"
                );
                socket.trigger(&envelope.event, &envelope.data);
            }
            Err(e) => {
                warn!(
                    connection = %connection_id,
                    error = %e,
                    bytes = text.len(),
                    "Dropping undecodable frame"
                );
            }
        }
    }

    /// A transport closed.
    ///
    /// Fires `disconnect` with `{code, reason}`, leaves every room and
    /// unregisters. Runs at most once per connection; returns `true` for the
    /// call that did the cleanup.
    pub fn handle_close(&self, connection_id: &ConnectionId, code: u16, reason: &str) -> bool {
        let Some(socket) = self.inner.registry.lookup(connection_id) else {
            debug!(connection = %connection_id, "Close for unknown connection");
            return false;
        };

        self.close_socket(&socket, code, reason)
    }

    fn close_socket(&self, socket: &Socket, code: u16, reason: &str) -> bool {
        let connection_id = socket.id();
        if !socket.mark_closed() {
            debug!(connection = %connection_id, "Connection already closing");
            return false;
        }

        let payload = serde_json::to_value(DisconnectReason::new(code, reason))
            .unwrap_or(Value::Null);
        socket.trigger(DISCONNECT_EVENT, &payload);

        let rooms = self.inner.rooms.leave_all(connection_id);
        self.inner.registry.unregister(connection_id);
        // Handlers may hold clones of hub handles; drop them with the connection.
        socket.dispatcher().clear();

        debug!(
            connection = %connection_id,
            code,
            reason = %reason,
            rooms = rooms.len(),
            "Connection closed"
        );

        true
    }

    fn force_close(&self, socket: &Socket) -> bool {
        const REASON: &str = "server shutting down";
        if let Err(e) = socket.transport().close(close_code::GOING_AWAY, REASON) {
            debug!(connection = %socket.id(), error = %e, "Transport close failed");
        }
        self.close_socket(socket, close_code::GOING_AWAY, REASON)
    }

    /// A transport reported an error.
    ///
    /// Only logged; cleanup happens in [`Hub::handle_close`], which the
    /// transport layer is expected to call afterwards.
    pub fn handle_error(&self, connection_id: &ConnectionId, error: &dyn fmt::Display) {
        if self.inner.registry.contains(connection_id) {
            warn!(connection = %connection_id, error = %error, "Transport error");
        } else {
            debug!(connection = %connection_id, error = %error, "Transport error for unknown connection");
        }
    }

    /// Emit to every live connection.
    pub fn emit<T>(&self, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.router().emit_all(event, data)
    }

    /// Emit to every live connection except `sender`.
    pub fn emit_except<T>(&self, sender: &ConnectionId, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.router().emit_all_except(sender, event, data)
    }

    /// Emit to every member of `room`.
    #[must_use]
    pub fn to(&self, room: impl Into<String>) -> RoomEmitter<'_> {
        RoomEmitter {
            hub: self,
            room: room.into(),
        }
    }

    /// Emit to every member of `room` except `sender`.
    pub fn emit_room_except<T>(
        &self,
        sender: &ConnectionId,
        room: &str,
        event: &str,
        data: &T,
    ) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.router().emit_room_except(sender, room, event, data)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.inner.registry.len(),
            room_count: self.inner.rooms.room_count(),
            total_memberships: self.inner.rooms.total_memberships(),
        }
    }

    /// Close every connection and clear the room index.
    ///
    /// Each connection gets its `disconnect` event (code 1001) and a close
    /// request on its transport. Later `handle_open` calls are rejected.
    /// Returns the number of connections closed.
    pub fn shutdown(&self) -> usize {
        self.inner.shut_down.store(true, Ordering::SeqCst);

        // Opens that passed their check before the flag was set may still be
        // registering; keep draining until the registry stays empty.
        let mut closed = 0;
        loop {
            let sockets = self.inner.registry.all();
            if sockets.is_empty() {
                break;
            }
            closed += sockets
                .iter()
                .filter(|socket| self.force_close(socket))
                .count();
        }

        self.inner.rooms.clear();

        info!(connections = closed, "Hub shut down");
        closed
    }

    /// `true` once [`Hub::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// `hub.to(room).emit(..)`: every member of a room.
pub struct RoomEmitter<'a> {
    hub: &'a Hub,
    room: String,
}

impl RoomEmitter<'_> {
    /// Returns the number of connections the frame was delivered to.
    pub fn emit<T>(&self, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.hub.router().emit_room(&self.room, event, data)
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Total number of room memberships.
    pub total_memberships: usize,
}
