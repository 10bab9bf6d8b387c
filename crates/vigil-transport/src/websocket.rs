//! WebSocket message source.
//!
//! This module provides a client-side source using tokio-tungstenite. One
//! connection attempt is made; when the socket closes the source is done.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use vigil_protocol::{codec, RawFrame};

use crate::traits::{MessageSource, TransportError};

/// A WebSocket connection to the event backend.
pub struct WebSocketSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    connected: bool,
}

impl WebSocketSource {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            error!(url, error = %e, "WebSocket connect failed");
            TransportError::ConnectFailed(e.to_string())
        })?;

        info!(url, "WebSocket connected");
        Ok(Self {
            stream,
            url: url.to_string(),
            connected: true,
        })
    }

    /// The URL this source is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn closed(&mut self) -> Result<Option<Value>, TransportError> {
        self.connected = false;
        Ok(None)
    }
}

#[async_trait]
impl MessageSource for WebSocketSource {
    async fn next_message(&mut self) -> Result<Option<Value>, TransportError> {
        if !self.connected {
            return Ok(None);
        }

        loop {
            let frame = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => RawFrame::Text(text),
                Some(Ok(Message::Binary(data))) => RawFrame::Binary(Bytes::from(data)),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(url = %self.url, "Received close frame");
                    return self.closed();
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(url = %self.url, "WebSocket stream ended");
                    return self.closed();
                }
                Some(Err(e)) => {
                    error!(url = %self.url, error = %e, "WebSocket error");
                    self.connected = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            };

            return codec::decode(&frame).map(Some).map_err(TransportError::from);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
