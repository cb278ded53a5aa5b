//! A live connection as seen by the hub and by event handlers.

use crate::dispatcher::{EventDispatcher, EventHandler, HandlerResult};
use crate::hub::{Hub, HubError, HubInner};
use crate::room::{validate_room_name, RoomName};
use beacon_protocol::codec;
use beacon_transport::{ConnectionId, Transport, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Between accept and close.
    Open,
    /// Terminal. The hub has removed, or is removing, every trace of it.
    Closed,
}

/// A connection registered with the hub.
///
/// Owned by the connection registry; rooms refer to it only by [`ConnectionId`].
pub struct Socket {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    closed: AtomicBool,
    hub: Weak<HubInner>,
}

impl Socket {
    pub(crate) fn new(id: ConnectionId, transport: Arc<dyn Transport>, hub: Weak<HubInner>) -> Self {
        Self {
            id,
            transport,
            dispatcher: EventDispatcher::new(),
            closed: AtomicBool::new(false),
            hub,
        }
    }

    /// A socket that belongs to no hub.
    #[cfg(test)]
    pub(crate) fn detached(id: ConnectionId, transport: Arc<dyn Transport>) -> Self {
        Self::new(id, transport, Weak::new())
    }

    /// The connection identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// `true` while the connection is open and its transport still accepts frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && self.transport.is_open()
    }

    /// Move to [`ConnectionState::Closed`]. Returns `true` only for the first call.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Register a handler for an event sent by this connection.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Socket, &Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.on(event, Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn on_handler(&self, event: impl Into<String>, handler: EventHandler) {
        self.dispatcher.on(event, handler);
    }

    /// Run this connection's handlers for an event.
    ///
    /// Returns the number of handlers that completed without a fault.
    pub fn trigger(&self, event: &str, data: &Value) -> usize {
        self.dispatcher.trigger(self, event, data)
    }

    /// Send an event to this connection only.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the connection is gone.
    pub fn emit<T>(&self, event: &str, data: &T) -> Result<(), HubError>
    where
        T: Serialize + ?Sized,
    {
        if self.state() == ConnectionState::Closed {
            return Err(HubError::Delivery(TransportError::ConnectionClosed));
        }

        let frame = codec::encode(event, data)?;
        self.transport.send(&frame)?;
        trace!(connection = %self.id, event = %event, "Emitted to connection");
        Ok(())
    }

    /// Join a room.
    ///
    /// Returns `true` if the connection was not already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the connection is closed or
    /// detached from its hub, or the per-connection room limit is reached.
    pub fn join(&self, room: &str) -> Result<bool, HubError> {
        validate_room_name(room).map_err(HubError::InvalidRoom)?;
        let hub = self.live_hub()?;

        let rooms = &hub.rooms;
        if !rooms.is_member(&self.id, room) {
            let limit = hub.config.max_rooms_per_connection;
            if rooms.membership_count(&self.id) >= limit {
                return Err(HubError::RoomLimit(limit));
            }
        }

        let joined = rooms.join(&self.id, room);

        // A close on another thread may have run `leave_all` before the insert.
        if self.state() == ConnectionState::Closed {
            rooms.leave(&self.id, room);
            return Err(HubError::UnknownConnection(self.id.clone()));
        }

        Ok(joined)
    }

    /// Leave a room. Returns `true` if the connection was a member.
    pub fn leave(&self, room: &str) -> bool {
        self.hub
            .upgrade()
            .is_some_and(|hub| hub.rooms.leave(&self.id, room))
    }

    /// Rooms this connection has joined.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomName> {
        self.hub
            .upgrade()
            .map(|hub| hub.rooms.rooms_of(&self.id))
            .unwrap_or_default()
    }

    /// Emit to every connection except this one.
    #[must_use]
    pub fn broadcast(&self) -> SocketBroadcast<'_> {
        SocketBroadcast { socket: self }
    }

    /// Emit to the members of `room` except this connection.
    #[must_use]
    pub fn to(&self, room: impl Into<RoomName>) -> SocketRoomBroadcast<'_> {
        SocketRoomBroadcast {
            socket: self,
            room: room.into(),
        }
    }

    /// The hub this connection belongs to, unless it has been dropped.
    #[must_use]
    pub fn hub(&self) -> Option<Hub> {
        self.hub.upgrade().map(Hub::from_inner)
    }

    fn live_hub(&self) -> Result<Arc<HubInner>, HubError> {
        if self.state() == ConnectionState::Closed {
            return Err(HubError::UnknownConnection(self.id.clone()));
        }
        self.hub
            .upgrade()
            .ok_or_else(|| HubError::UnknownConnection(self.id.clone()))
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// `socket.broadcast().emit(..)`: every connection except the sender.
pub struct SocketBroadcast<'a> {
    socket: &'a Socket,
}

impl SocketBroadcast<'_> {
    /// Returns the number of connections the frame was delivered to.
    pub fn emit<T>(&self, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.socket.hub.upgrade().map_or(0, |hub| {
            hub.router().emit_all_except(&self.socket.id, event, data)
        })
    }
}

/// `socket.to(room).emit(..)`: members of a room except the sender.
pub struct SocketRoomBroadcast<'a> {
    socket: &'a Socket,
    room: RoomName,
}

impl SocketRoomBroadcast<'_> {
    /// Returns the number of connections the frame was delivered to.
    pub fn emit<T>(&self, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.socket.hub.upgrade().map_or(0, |hub| {
            hub.router()
                .emit_room_except(&self.socket.id, &self.room, event, data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::MemoryTransport;
    use serde_json::json;

    #[test]
    fn test_emit_to_self() {
        let transport = MemoryTransport::new();
        let socket = Socket::detached(ConnectionId::from("a"), transport.clone());

        socket.emit("welcome", &json!({"id": "a"})).unwrap();
        assert_eq!(
            transport.frames(),
            vec![r#"{"event":"welcome","data":{"id":"a"}}"#]
        );
    }

    #[test]
    fn test_closed_socket_rejects_emit() {
        let transport = MemoryTransport::new();
        let socket = Socket::detached(ConnectionId::from("a"), transport.clone());

        assert!(socket.mark_closed());
        assert!(!socket.mark_closed());
        assert_eq!(socket.state(), ConnectionState::Closed);
        assert!(matches!(
            socket.emit("late", &1),
            Err(HubError::Delivery(TransportError::ConnectionClosed))
        ));
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn test_detached_socket_room_ops() {
        let socket = Socket::detached(ConnectionId::from("a"), MemoryTransport::new());

        assert!(matches!(
            socket.join("lobby"),
            Err(HubError::UnknownConnection(_))
        ));
        assert!(matches!(socket.join(""), Err(HubError::InvalidRoom(_))));
        assert!(!socket.leave("lobby"));
        assert!(socket.rooms().is_empty());
        assert_eq!(socket.broadcast().emit("x", &1), 0);
        assert_eq!(socket.to("lobby").emit("x", &1), 0);
        assert!(socket.hub().is_none());
    }

    #[test]
    fn test_is_open_follows_transport() {
        let transport = MemoryTransport::new();
        let socket = Socket::detached(ConnectionId::from("a"), transport.clone());

        assert!(socket.is_open());
        transport.drop_connection();
        assert!(!socket.is_open());
        assert_eq!(socket.state(), ConnectionState::Open);
    }

    #[test]
    fn test_join_racing_close_leaves_no_membership() {
        use crate::hub::Hub;

        for _ in 0..200 {
            let hub = Hub::new();
            let socket = hub.handle_open(MemoryTransport::new()).unwrap();

            let joiner = {
                let socket = socket.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let _ = socket.join(&format!("room-{i}"));
                    }
                })
            };

            hub.handle_close(socket.id(), 1000, "bye");
            joiner.join().unwrap();

            assert!(hub.rooms().rooms_of(socket.id()).is_empty());
            assert_eq!(hub.stats().room_count, 0);
            assert_eq!(hub.stats().total_memberships, 0);
        }
    }
}
