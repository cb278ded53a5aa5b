//! # beacon-store
//!
//! Keyed record persistence for the Beacon server.
//!
//! - [`RecordStore`] - async get-all/load/save/delete over string keys
//! - [`JsonFileStore`] - the whole map as one JSON object file
//! - [`MemoryStore`] - in-process map for tests
//! - [`models`] - media items and triggers
//! - [`query`] - lookups the HTTP layer needs

pub mod models;
pub mod query;
pub mod store;

pub use models::{MediaItem, MediaType, Position, Trigger, TriggerKind};
pub use query::{ensure_media_for_url, query_triggers, TriggerQuery};
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoreError};
