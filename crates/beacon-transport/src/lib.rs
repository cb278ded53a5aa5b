//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon realtime hub.
//!
//! - **WebSocket** - axum WebSocket adapter with a non-blocking outbound queue
//! - **Memory** - records frames in memory, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! The hub only ever writes through the [`Transport`] trait. Reading is the
//! job of whoever owns the socket: it feeds received text frames into the hub
//! and reports close/error.
//!
//! ```rust,ignore
//! use beacon_transport::{Transport, WebSocketTransport};
//!
//! let (transport, outbound) = WebSocketTransport::new(None);
//! tokio::spawn(beacon_transport::websocket::write_loop(sink, outbound));
//! transport.send(r#"{"event":"ping","data":1}"#)?;
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryTransport;
pub use traits::{ConnectionId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{Outbound, WebSocketTransport};
