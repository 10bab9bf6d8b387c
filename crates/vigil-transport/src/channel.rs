//! In-process message source backed by a tokio channel.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{MessageSource, TransportError};

/// Sending half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Value>,
}

impl ChannelSender {
    /// Queue a message for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has been dropped.
    pub async fn send(&self, message: Value) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// A source fed from inside the process. Useful for replay and tests.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Value>,
    connected: Arc<AtomicBool>,
}

impl ChannelSource {
    /// Create a source with a bounded queue.
    #[must_use]
    pub fn new(capacity: usize) -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            rx,
            connected: Arc::new(AtomicBool::new(true)),
        };
        (ChannelSender { tx }, source)
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<Value>, TransportError> {
        let message = self.rx.recv().await;
        if message.is_none() {
            self.connected.store(false, Ordering::Release);
        }
        Ok(message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
