//! Source abstraction for upstream messages.
//!
//! A source hands over one decoded message at a time and exposes whether
//! it is currently connected. Reconnection is the caller's concern.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame arrived but could not be decoded. The source stays usable.
    #[error("Protocol error: {0}")]
    Protocol(#[from] vigil_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the source can keep delivering after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// An upstream that yields decoded messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Receive the next decoded message.
    ///
    /// Returns `None` once the upstream is closed cleanly.
    async fn next_message(&mut self) -> Result<Option<Value>, TransportError>;

    /// Whether the upstream is currently connected.
    fn is_connected(&self) -> bool;

    /// Get the source name (e.g. "channel", "websocket").
    fn name(&self) -> &'static str;
}
