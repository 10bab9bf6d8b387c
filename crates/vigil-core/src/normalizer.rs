//! Message normalizer.
//!
//! The only entry point for untrusted input. A message is validated once
//! here and forwarded to the dispatcher as a typed [`Event`]; consumers
//! downstream never re-validate.

use crate::dispatcher::Dispatcher;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};
use vigil_protocol::Event;

/// Validates decoded messages and forwards them to a [`Dispatcher`].
#[derive(Debug)]
pub struct Normalizer {
    dispatcher: Dispatcher,
    accepted: AtomicU64,
    rejected: AtomicU64,
    heartbeats: AtomicU64,
}

impl Normalizer {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
        }
    }

    /// The dispatcher messages are forwarded to.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Validate `message` and dispatch it.
    ///
    /// Returns `false` without dispatching anything if the message is not an
    /// object, its `type` is not a catalog key, or its payload does not fit
    /// the key's shape. Never panics on malformed input.
    pub fn handle_message(&self, message: &Value) -> bool {
        match Event::from_message(message) {
            Ok(event) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                let key = event.key();
                let delivered = self.dispatcher.dispatch(&event);
                if key.is_control() {
                    self.heartbeats.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, delivered, "Heartbeat accepted");
                } else {
                    debug!(key = %key, delivered, "Message accepted");
                }
                true
            }
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "Message rejected");
                false
            }
        }
    }

    /// Accept/reject counters. Heartbeats are also counted as accepted.
    #[must_use]
    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

/// Normalizer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NormalizerStats {
    pub accepted: u64,
    pub rejected: u64,
    /// Accepted `ping`/`pong` messages.
    pub heartbeats: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Handler;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use vigil_protocol::kinds::{Ping, SecurityEvent};
    use vigil_protocol::{HeartbeatPayload, RiskLevel, SecurityEventPayload};

    #[test]
    fn test_envelope_dispatches_data() {
        let dispatcher = Dispatcher::new();
        let seen: Arc<Mutex<Vec<SecurityEventPayload>>> = Arc::default();
        let sink = Arc::clone(&seen);
        dispatcher.on(&Handler::<SecurityEvent>::new(move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        }));

        let normalizer = Normalizer::new(dispatcher);
        assert!(normalizer.handle_message(&json!({
            "type": "event",
            "data": {
                "id": 12,
                "camera_id": "front_door",
                "risk_score": 75,
                "risk_level": "high",
                "summary": "Unknown person at door"
            }
        })));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, 12);
        assert_eq!(seen[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn test_bare_message_dispatches_itself() {
        let dispatcher = Dispatcher::new();
        let seen: Arc<Mutex<Vec<HeartbeatPayload>>> = Arc::default();
        let sink = Arc::clone(&seen);
        dispatcher.on(&Handler::<Ping>::new(move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        }));

        let normalizer = Normalizer::new(dispatcher);
        assert!(normalizer.handle_message(&json!({"type": "ping", "sent_at": 99})));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind.as_deref(), Some("ping"));
        assert_eq!(seen[0].extra.get("sent_at"), Some(&json!(99)));
    }

    #[test]
    fn test_rejected_messages_dispatch_nothing() {
        let dispatcher = Dispatcher::new();
        let normalizer = Normalizer::new(dispatcher.clone());

        assert!(!normalizer.handle_message(&json!({"type": "bogus"})));
        assert!(!normalizer.handle_message(&json!(null)));
        assert!(!normalizer.handle_message(&json!("ping")));
        assert!(!normalizer.handle_message(&json!({"data": {}})));
        assert!(!normalizer.handle_message(&json!({"type": "service_status", "data": {"service": 1}})));

        assert_eq!(dispatcher.stats().emitted, 0);
        assert_eq!(
            normalizer.stats(),
            NormalizerStats {
                accepted: 0,
                rejected: 5,
                heartbeats: 0,
            }
        );
    }

    #[test]
    fn test_heartbeats_counted_apart() {
        let normalizer = Normalizer::new(Dispatcher::new());

        assert!(normalizer.handle_message(&json!({"type": "ping"})));
        assert!(normalizer.handle_message(&json!({"type": "pong"})));
        assert!(normalizer.handle_message(&json!({
            "type": "service_status",
            "data": {"service": "redis", "status": "healthy"}
        })));
        assert!(!normalizer.handle_message(&json!({"type": "ping", "version": "9.0"})));

        assert_eq!(
            normalizer.stats(),
            NormalizerStats {
                accepted: 3,
                rejected: 1,
                heartbeats: 2,
            }
        );
    }
}
