//! Encoding and decoding of live-channel text frames.
//!
//! Frames are UTF-8 JSON objects. Decoding is two-phase so callers can tell
//! a malformed frame from a well-formed frame of a type this client does not
//! understand; both are discarded by the receive loop, but logged
//! differently.

use serde_json::Value;

use crate::envelope::{Envelope, KNOWN_TYPES};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The envelope could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame has no string `type` field.
    #[error("frame has no type tag")]
    MissingType,
    /// The `type` tag is not one this client understands.
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
    /// The tag is known but the body does not match its shape.
    #[error("invalid {kind} frame: {reason}")]
    InvalidPayload {
        /// The frame's type tag.
        kind: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Encodes an [`Envelope`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a JSON text frame into an [`Envelope`].
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for non-JSON or non-object input,
/// [`CodecError::MissingType`] when there is no tag,
/// [`CodecError::UnknownType`] for unrecognized tags, and
/// [`CodecError::InvalidPayload`] when the body does not fit the tag.
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(CodecError::Malformed("frame is not a JSON object".into()));
    }
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(CodecError::MissingType),
    };
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| CodecError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}
