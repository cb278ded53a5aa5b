//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon realtime hub.
//!
//! Frames are UTF-8 JSON text envelopes of the form
//! `{"event": <string>, "data": <any JSON value>}`. Anything else is a decode
//! failure, which the hub drops without closing the connection.
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::codec;
//!
//! let text = codec::encode("ping", &1).unwrap();
//! assert_eq!(text, r#"{"event":"ping","data":1}"#);
//!
//! let envelope = codec::decode(&text).unwrap();
//! assert_eq!(envelope.event, "ping");
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, Envelope, ProtocolError, MAX_FRAME_SIZE};
pub use events::{close_code, is_reserved, DisconnectReason, CONNECTION_EVENT, DISCONNECT_EVENT};
