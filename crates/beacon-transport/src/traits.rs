//! Transport abstraction traits for Beacon.
//!
//! The hub never touches sockets directly; it holds an `Arc<dyn Transport>`
//! per connection and writes already-encoded text frames through it.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The write half of a single connection, as seen by the hub.
///
/// Implementations must not block: `send` hands the frame off (to a queue,
/// a buffer) and returns immediately.
pub trait Transport: Send + Sync {
    /// Queue a text frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the peer is gone.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection with a close code and reason.
    ///
    /// Closing an already closed transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame could not be queued.
    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
