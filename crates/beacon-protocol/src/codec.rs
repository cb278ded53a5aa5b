//! Codec for encoding and decoding Beacon envelopes.
//!
//! Every frame on the wire is a single UTF-8 JSON text frame shaped as
//! `{"event": <string>, "data": <any JSON value>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// The text is not valid JSON, or the payload cannot be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame has no usable `event` field.
    #[error("Frame is missing a non-empty \"event\" field")]
    MissingEvent,

    /// The frame is JSON but not an envelope.
    #[error("Invalid frame: {0}")]
    InvalidShape(&'static str),
}

/// A decoded `{event, data}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Opaque payload, `null` when the frame carried none.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Encode this envelope to wire text.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded frame is too large.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(&self.event, &self.data)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    event: &'a str,
    data: &'a T,
}

/// Encode an event and payload to wire text.
///
/// The field order is always `event` then `data`.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized or the frame is too large.
pub fn encode<T>(event: &str, data: &T) -> Result<String, ProtocolError>
where
    T: Serialize + ?Sized,
{
    let text = serde_json::to_string(&EnvelopeRef { event, data })?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode wire text into an envelope.
///
/// # Errors
///
/// Returns an error if the text is too large, is not JSON, is not an object,
/// or has no non-empty string `event`.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
        return Err(ProtocolError::InvalidShape("expected a JSON object"));
    };

    let event = match fields.remove("event") {
        Some(Value::String(event)) if !event.is_empty() => event,
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return Err(ProtocolError::MissingEvent)
        }
        Some(_) => return Err(ProtocolError::InvalidShape("\"event\" must be a string")),
    };

    let data = fields.remove("data").unwrap_or(Value::Null);

    Ok(Envelope { event, data })
}
