//! Broadcast routing for Beacon.
//!
//! The router resolves a [`Target`] to a snapshot of connections, encodes the
//! envelope once and writes it to each target independently. A failed write
//! is logged and skipped; it never aborts delivery to the rest.

use crate::registry::ConnectionRegistry;
use crate::room::RoomIndex;
use crate::socket::Socket;
use beacon_protocol::codec;
use beacon_transport::ConnectionId;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Every live connection.
    All,
    /// Every live connection except the sender.
    AllExcept(&'a ConnectionId),
    /// Every member of a room.
    Room(&'a str),
    /// Every member of a room except the sender.
    RoomExcept(&'a str, &'a ConnectionId),
}

/// Computes broadcast targets and delivers frames to them.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastRouter<'a> {
    registry: &'a ConnectionRegistry,
    rooms: &'a RoomIndex,
}

impl<'a> BroadcastRouter<'a> {
    /// Create a router over a registry and room index.
    #[must_use]
    pub fn new(registry: &'a ConnectionRegistry, rooms: &'a RoomIndex) -> Self {
        Self { registry, rooms }
    }

    /// Emit to every live connection.
    pub fn emit_all<T>(&self, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.emit(Target::All, event, data)
    }

    /// Emit to every live connection except `sender`.
    pub fn emit_all_except<T>(&self, sender: &ConnectionId, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.emit(Target::AllExcept(sender), event, data)
    }

    /// Emit to every member of `room`.
    pub fn emit_room<T>(&self, room: &str, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.emit(Target::Room(room), event, data)
    }

    /// Emit to every member of `room` except `sender`, even if `sender` is a member.
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
        self.emit(Target::RoomExcept(room, sender), event, data)
    }

    /// Encode once and deliver to every connection in `target`.
    ///
    /// Returns the number of connections that accepted the frame.
    pub fn emit<T>(&self, target: Target<'_>, event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        match codec::encode(event, data) {
            Ok(frame) => self.deliver(target, event, &frame),
            Err(e) => {
                warn!(event = %event, target = ?target, error = %e, "Failed to encode broadcast");
                0
            }
        }
    }

    /// Resolve a target to a snapshot of connections.
    #[must_use]
    pub fn targets(&self, target: Target<'_>) -> Vec<Arc<Socket>> {
        match target {
            Target::All => self.registry.all(),
            Target::AllExcept(sender) => self
                .registry
                .all()
                .into_iter()
                .filter(|socket| socket.id() != sender)
                .collect(),
            Target::Room(room) => self.room_targets(room, None),
            Target::RoomExcept(room, sender) => self.room_targets(room, Some(sender)),
        }
    }

    fn room_targets(&self, room: &str, exclude: Option<&ConnectionId>) -> Vec<Arc<Socket>> {
        self.rooms
            .members_of(room)
            .into_iter()
            .filter(|id| Some(id) != exclude)
            .filter_map(|id| {
                let socket = self.registry.lookup(&id);
                if socket.is_none() {
                    trace!(room = %room, connection = %id, "Skipping departed member");
                }
                socket
            })
            .collect()
    }

    fn deliver(&self, target: Target<'_>, event: &str, frame: &str) -> usize {
        let targets = self.targets(target);
        let mut delivered = 0;

        for socket in &targets {
            if !socket.is_open() {
                trace!(connection = %socket.id(), event = %event, "Skipping closed connection");
                continue;
            }

            match socket.transport().send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %socket.id(),
                        event = %event,
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        debug!(
            event = %event,
            target = ?target,
            targets = targets.len(),
            delivered,
            "Broadcast"
        );

        delivered
    }
}
