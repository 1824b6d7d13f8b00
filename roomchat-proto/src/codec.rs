//! JSON text-frame encoding for relay events.
//!
//! One event per WebSocket text frame. Decoding is the validation step at
//! the transport boundary: anything that does not map onto a known event
//! variant is rejected here.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Encodes an event into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not valid JSON or does
/// not match the expected event shape.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes a frame sent by a client.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for malformed or unknown events.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    decode(text)
}

/// Encodes a frame to be pushed to a client.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}
