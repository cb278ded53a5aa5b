//! Reserved event names and their payloads.
//!
//! These events are synthesized by the hub itself. A client may still send a
//! frame with one of these names; it is dispatched like any other event.

use serde::{Deserialize, Serialize};

/// Fired once per accepted connection, carrying the connection identifier.
pub const CONNECTION_EVENT: &str = "connection";

/// Fired once per terminated connection, carrying a [`DisconnectReason`].
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Returns `true` for the names the hub synthesizes locally.
#[must_use]
pub fn is_reserved(event: &str) -> bool {
    event == CONNECTION_EVENT || event == DISCONNECT_EVENT
}

/// WebSocket close codes used by the hub.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Server is over capacity.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Payload of the [`DISCONNECT_EVENT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    /// Close code reported by the transport.
    pub code: u16,
    /// Close reason reported by the transport.
    pub reason: String,
}

impl DisconnectReason {
    /// Create a new disconnect reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}
