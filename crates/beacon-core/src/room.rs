//! Room index for Beacon.
//!
//! Rooms are named groups of connections. A room exists only while it has at
//! least one member: it is created by the first join and deleted by the last
//! leave.

use beacon_transport::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room name.
pub type RoomName = String;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Room membership, indexed both ways.
///
/// `rooms` is the source of truth for routing; `memberships` mirrors it per
/// connection so a disconnect can leave every room without scanning.
#[derive(Debug, Default)]
pub struct RoomIndex {
    /// Room name -> member connection IDs.
    rooms: DashMap<RoomName, HashSet<ConnectionId>>,
    /// Connection ID -> joined room names.
    memberships: DashMap<ConnectionId, HashSet<RoomName>>,
}

impl RoomIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&self, connection_id: &ConnectionId, room: &str) -> bool {
        let inserted = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                debug!(room = %room, "Creating room");
                HashSet::new()
            })
            .insert(connection_id.clone());

        self.memberships
            .entry(connection_id.clone())
            .or_default()
            .insert(room.to_string());

        if inserted {
            debug!(room = %room, connection = %connection_id, "Joined room");
        }

        inserted
    }

    /// Remove a connection from a room, deleting the room if now empty.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, connection_id: &ConnectionId, room: &str) -> bool {
        let removed = self.remove_member(room, connection_id);

        if let Some(mut joined) = self.memberships.get_mut(connection_id) {
            joined.remove(room);
            if joined.is_empty() {
                drop(joined); // Release the shard lock
                self.memberships
                    .remove_if(connection_id, |_, joined| joined.is_empty());
            }
        }

        if removed {
            debug!(room = %room, connection = %connection_id, "Left room");
        }

        removed
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Returns the names of the rooms it left.
    pub fn leave_all(&self, connection_id: &ConnectionId) -> Vec<RoomName> {
        let joined = self
            .memberships
            .remove(connection_id)
            .map(|(_, joined)| joined)
            .unwrap_or_default();

        let left: Vec<RoomName> = joined
            .into_iter()
            .filter(|room| self.remove_member(room, connection_id))
            .collect();

        debug!(connection = %connection_id, rooms = left.len(), "Left all rooms");

        left
    }

    /// Snapshot of a room's members. Empty if the room does not exist.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomName> {
        self.memberships
            .get(connection_id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId, room: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Number of rooms a connection has joined.
    #[must_use]
    pub fn membership_count(&self, connection_id: &ConnectionId) -> usize {
        self.memberships
            .get(connection_id)
            .map_or(0, |joined| joined.len())
    }

    /// Number of existing rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total number of (connection, room) memberships.
    #[must_use]
    pub fn total_memberships(&self) -> usize {
        self.rooms.iter().map(|members| members.len()).sum()
    }

    /// All room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every room and membership.
    pub fn clear(&self) {
        self.rooms.clear();
        self.memberships.clear();
    }

    fn remove_member(&self, room: &str, connection_id: &ConnectionId) -> bool {
        match self.rooms.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(connection_id);
                if entry.get().is_empty() {
                    entry.remove();
                    debug!(room = %room, "Deleted empty room");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    #[test]
    fn test_join_leave_deletes_room() {
        let index = RoomIndex::new();

        assert!(index.join(&id("a"), "r"));
        assert!(index.contains("r"));
        assert!(index.is_member(&id("a"), "r"));

        assert!(index.leave(&id("a"), "r"));
        assert!(!index.contains("r"));
        assert_eq!(index.membership_count(&id("a")), 0);

        // Leaving again is harmless.
        assert!(!index.leave(&id("a"), "r"));
        assert!(!index.contains("r"));
    }

    #[test]
    fn test_join_twice() {
        let index = RoomIndex::new();

        assert!(index.join(&id("a"), "r"));
        assert!(!index.join(&id("a"), "r"));
        assert_eq!(index.members_of("r").len(), 1);
    }

    #[test]
    fn test_room_survives_until_last_leave() {
        let index = RoomIndex::new();
        index.join(&id("a"), "lobby");
        index.join(&id("b"), "lobby");

        index.leave(&id("a"), "lobby");
        assert!(index.contains("lobby"));
        assert_eq!(index.members_of("lobby"), vec![id("b")]);

        index.leave(&id("b"), "lobby");
        assert!(!index.contains("lobby"));
    }

    #[test]
    fn test_leave_all() {
        let index = RoomIndex::new();
        index.join(&id("a"), "one");
        index.join(&id("a"), "two");
        index.join(&id("b"), "two");

        let mut left = index.leave_all(&id("a"));
        left.sort();
        assert_eq!(left, vec!["one".to_string(), "two".to_string()]);

        assert!(!index.contains("one"));
        assert_eq!(index.members_of("two"), vec![id("b")]);
        assert!(index.rooms_of(&id("a")).is_empty());
        assert_eq!(index.total_memberships(), 1);
    }

    #[test]
    fn test_members_of_missing_room() {
        let index = RoomIndex::new();
        assert!(index.members_of("nowhere").is_empty());
    }

    #[test]
    fn test_members_snapshot_is_detached() {
        let index = RoomIndex::new();
        index.join(&id("a"), "r");
        index.join(&id("b"), "r");

        let snapshot = index.members_of("r");
        index.leave_all(&id("a"));
        index.leave_all(&id("b"));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(index.room_count(), 0);
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("lobby").is_ok());
        assert!(validate_room_name("overlay:main").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name).is_err());
    }

    #[test]
    fn test_concurrent_join_leave() {
        let index = std::sync::Arc::new(RoomIndex::new());

        let workers: Vec<_> = (0..8)
            .map(|n| {
                let index = index.clone();
                std::thread::spawn(move || {
                    let conn = ConnectionId::from(format!("conn-{n}"));
                    for round in 0..200 {
                        index.join(&conn, "shared");
                        index.join(&conn, &format!("own-{}", round % 4));
                        index.leave(&conn, "shared");
                    }
                    index.leave_all(&conn);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(index.room_count(), 0);
        assert_eq!(index.total_memberships(), 0);
    }
}
