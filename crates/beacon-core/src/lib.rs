//! # beacon-core
//!
//! Connection tracking, rooms and event routing for the Beacon realtime hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - The set of live connections, keyed by identifier
//! - **Rooms** - Named groups of connections, created on first join and
//!   deleted on last leave
//! - **Dispatcher** - Per-connection event name -> handler list
//! - **Router** - Broadcast to all / all-but-sender / room / room-but-sender
//! - **Hub** - Service object tying them together, driven by the transport
//!   layer's open/message/close/error callbacks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │         │              ▲
//!                       ▼         ▼              │
//!               ┌────────────┐ ┌─────────────┐   │
//!               │ Dispatcher │ │   Router    │───┤
//!               └────────────┘ └─────────────┘   │
//!                                     │    ┌─────────────┐
//!                                     └───▶│    Rooms    │
//!                                          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use beacon_core::Hub;
//! use beacon_transport::MemoryTransport;
//!
//! let hub = Hub::new();
//! hub.on_connection(|socket| {
//!     socket.on("ping", |socket, data| {
//!         socket.emit("pong", data)?;
//!         Ok(())
//!     });
//! });
//!
//! let transport = MemoryTransport::new();
//! let socket = hub.handle_open(transport.clone()).unwrap();
//! hub.handle_message(socket.id(), r#"{"event":"ping","data":1}"#);
//! assert_eq!(transport.frames(), vec![r#"{"event":"pong","data":1}"#]);
//! ```

pub mod dispatcher;
pub mod hub;
pub mod registry;
pub mod room;
pub mod router;
pub mod socket;

pub use dispatcher::{handler, EventDispatcher, EventHandler, HandlerError, HandlerResult};
pub use hub::{ConnectionHook, Hub, HubConfig, HubError, HubStats, RoomEmitter};
pub use registry::ConnectionRegistry;
pub use room::{validate_room_name, RoomIndex, RoomName};
pub use router::{BroadcastRouter, Target};
pub use socket::{ConnectionState, Socket};
