//! Codec for encoding and decoding Courier events.
//!
//! The wire format is one JSON object per WebSocket text frame; there is no
//! additional framing beyond the transport's own.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum accepted event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound client event from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid event.
pub fn decode_client(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode an outbound server event to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode_server(event: &ServerEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(text)
}

/// Encode a client event to a text frame.
///
/// Primarily useful for clients and tests.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode_client(event: &ClientEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(text)
}
