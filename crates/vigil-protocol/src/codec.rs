//! Decoding raw transport frames into messages.
//!
//! Upstream frames are JSON text or MessagePack binary. Both decode into the
//! same untyped [`serde_json::Value`], which is then validated by
//! [`Event::from_message`].

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::catalog::EventKey;
use crate::event::Event;
use crate::version::{MalformedVersion, Version, CATALOG_VERSION};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur while decoding or validating a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON decoding error.
    #[error("JSON decoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack decoding error.
    #[error("MessagePack decoding error: {0}")]
    MessagePack(#[from] rmp_serde::decode::Error),

    /// Message is not an object.
    #[error("Message is not an object")]
    NotAnObject,

    /// Message has no string `type` field.
    #[error("Message has no string type field")]
    MissingType,

    /// Message `version` is not a `<major>.<minor>` string.
    #[error(transparent)]
    MalformedVersion(#[from] MalformedVersion),

    /// Message speaks a catalog with a different major version.
    #[error("Incompatible catalog version {0} (expected {})", CATALOG_VERSION)]
    IncompatibleVersion(Version),

    /// Message `type` is not in the catalog.
    #[error("Unknown event key: {0}")]
    UnknownKey(String),

    /// Payload does not match the shape bound to its key.
    #[error("Invalid payload for {key}: {source}")]
    Payload {
        key: EventKey,
        #[source]
        source: serde_json::Error,
    },
}

/// A raw frame as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    /// UTF-8 JSON text.
    Text(String),
    /// MessagePack-encoded bytes.
    Binary(Bytes),
}

impl RawFrame {
    /// Size of the frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RawFrame::Text(text) => text.len(),
            RawFrame::Binary(data) => data.len(),
        }
    }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a raw frame into an untyped message.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not valid JSON or
/// MessagePack.
pub fn decode(frame: &RawFrame) -> Result<Value, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    match frame {
        RawFrame::Text(text) => Ok(serde_json::from_str(text)?),
        RawFrame::Binary(data) => Ok(rmp_serde::from_slice(data)?),
    }
}

/// Decode and validate a raw frame in one step.
///
/// # Errors
///
/// Returns an error if decoding or validation fails.
pub fn decode_event(frame: &RawFrame) -> Result<Event, ProtocolError> {
    let message = decode(frame)?;
    Event::from_message(&message)
}
