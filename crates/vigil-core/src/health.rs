//! Service health tracking.
//!
//! Keeps the latest reported status per backend service. The set of
//! services is fixed by the backend, so entries are never evicted.

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::{Dispatcher, Handler, Subscription};
use crate::revision::Revision;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_protocol::kinds::ServiceStatus;
use vigil_protocol::{ServiceState, ServiceStatusPayload};

/// Latest status of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusEntry {
    pub service: String,
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Epoch milliseconds the status was received.
    pub updated_at: u64,
}

impl ServiceStatusEntry {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Callback invoked after every status update.
pub type ChangeCallback = Box<dyn Fn(&ServiceStatusEntry) + Send + Sync>;

struct HealthBook {
    services: DashMap<String, ServiceStatusEntry>,
    latest: RwLock<Option<ServiceStatusEntry>>,
    on_change: Option<ChangeCallback>,
    clock: Arc<dyn Clock>,
    alive: AtomicBool,
    revision: Revision,
}

impl HealthBook {
    fn update(&self, payload: &ServiceStatusPayload) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }

        let entry = ServiceStatusEntry {
            service: payload.service.clone(),
            status: payload.status,
            message: payload.message.clone(),
            updated_at: self.clock.now_millis(),
        };

        let previous = self.services.insert(payload.service.clone(), entry.clone());
        *self.latest.write() = Some(entry.clone());

        match previous {
            Some(prev) if prev.status == entry.status => {
                debug!(service = %entry.service, status = ?entry.status, "Service status refreshed");
            }
            _ if entry.is_healthy() => {
                info!(service = %entry.service, "Service healthy");
            }
            _ => {
                warn!(
                    service = %entry.service,
                    status = ?entry.status,
                    message = entry.message.as_deref().unwrap_or(""),
                    "Service not healthy"
                );
            }
        }

        self.revision.bump();
        if let Some(callback) = &self.on_change {
            callback(&entry);
        }
    }
}

/// Tracks per-service health from `service_status` events.
pub struct ServiceHealthTracker {
    book: Arc<HealthBook>,
    subscription: Subscription,
}

impl ServiceHealthTracker {
    /// Attach a tracker with the system clock and no callback.
    #[must_use]
    pub fn attach(dispatcher: &Dispatcher) -> Self {
        Self::with_options(dispatcher, None, Arc::new(SystemClock))
    }

    /// Attach a tracker with an optional change callback and a custom clock.
    #[must_use]
    pub fn with_options(
        dispatcher: &Dispatcher,
        on_change: Option<ChangeCallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let book = Arc::new(HealthBook {
            services: DashMap::new(),
            latest: RwLock::new(None),
            on_change,
            clock,
            alive: AtomicBool::new(true),
            revision: Revision::new(),
        });

        let handler_book = Arc::clone(&book);
        let subscription = dispatcher.on(&Handler::<ServiceStatus>::named(
            "service-health-tracker",
            move |payload| {
                handler_book.update(payload);
                Ok(())
            },
        ));

        Self { book, subscription }
    }

    /// Snapshot of every known service, sorted by name.
    #[must_use]
    pub fn services(&self) -> Vec<ServiceStatusEntry> {
        let mut services: Vec<ServiceStatusEntry> = self
            .book
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        services
    }

    #[must_use]
    pub fn get(&self, service: &str) -> Option<ServiceStatusEntry> {
        self.book
            .services
            .get(service)
            .map(|entry| entry.value().clone())
    }

    /// The most recent status change of any service.
    #[must_use]
    pub fn latest_change(&self) -> Option<ServiceStatusEntry> {
        self.book.latest.read().clone()
    }

    /// Whether any known service is not healthy.
    #[must_use]
    pub fn has_unhealthy_services(&self) -> bool {
        self.book.services.iter().any(|entry| !entry.is_healthy())
    }

    /// Whether `service` last reported healthy. Unknown services are not.
    #[must_use]
    pub fn is_service_healthy(&self, service: &str) -> bool {
        self.book
            .services
            .get(service)
            .is_some_and(|entry| entry.is_healthy())
    }

    /// Services that are not healthy, sorted by name.
    #[must_use]
    pub fn get_unhealthy_services(&self) -> Vec<ServiceStatusEntry> {
        self.services()
            .into_iter()
            .filter(|entry| !entry.is_healthy())
            .collect()
    }

    /// Forget every known service.
    pub fn clear(&self) {
        self.book.services.clear();
        *self.book.latest.write() = None;
        self.book.revision.bump();
    }

    /// Watch the revision counter, bumped after every change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.book.revision.subscribe()
    }
}

impl Drop for ServiceHealthTracker {
    fn drop(&mut self) {
        self.book.alive.store(false, Ordering::Release);
        self.subscription.unsubscribe();
        debug!("Service health tracker detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::normalizer::Normalizer;
    use parking_lot::Mutex;
    use serde_json::json;

    fn report(service: &str, status: ServiceState) -> ServiceStatusPayload {
        ServiceStatusPayload {
            service: service.to_string(),
            status,
            message: None,
        }
    }

    #[test]
    fn test_updates_overwrite() {
        let dispatcher = Dispatcher::new();
        let clock = Arc::new(ManualClock::new(100));
        let tracker = ServiceHealthTracker::with_options(&dispatcher, None, clock.clone());

        dispatcher.emit::<ServiceStatus>(report("redis", ServiceState::Unhealthy));
        clock.advance(50);
        dispatcher.emit::<ServiceStatus>(report("redis", ServiceState::Healthy));

        let services = tracker.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].status, ServiceState::Healthy);
        assert_eq!(services[0].updated_at, 150);
    }

    #[test]
    fn test_unhealthy_flag_follows_reports() {
        let dispatcher = Dispatcher::new();
        let tracker = ServiceHealthTracker::attach(&dispatcher);
        assert!(!tracker.has_unhealthy_services());

        dispatcher.emit::<ServiceStatus>(report("redis", ServiceState::Healthy));
        dispatcher.emit::<ServiceStatus>(report("detector", ServiceState::Healthy));
        assert!(!tracker.has_unhealthy_services());

        dispatcher.emit::<ServiceStatus>(report("detector", ServiceState::Restarting));
        assert!(tracker.has_unhealthy_services());
        assert!(!tracker.is_service_healthy("detector"));
        assert!(tracker.is_service_healthy("redis"));
        assert_eq!(tracker.get_unhealthy_services()[0].service, "detector");

        dispatcher.emit::<ServiceStatus>(report("detector", ServiceState::Healthy));
        assert!(!tracker.has_unhealthy_services());
        assert!(tracker.get_unhealthy_services().is_empty());
    }

    #[test]
    fn test_unknown_service_is_not_healthy() {
        let tracker = ServiceHealthTracker::attach(&Dispatcher::new());
        assert!(!tracker.is_service_healthy("nlp"));
        assert!(tracker.get("nlp").is_none());
    }

    #[test]
    fn test_latest_change_and_callback() {
        let dispatcher = Dispatcher::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let tracker = ServiceHealthTracker::with_options(
            &dispatcher,
            Some(Box::new(move |entry: &ServiceStatusEntry| {
                sink.lock().push(entry.service.clone());
            })),
            Arc::new(ManualClock::new(0)),
        );

        dispatcher.emit::<ServiceStatus>(report("redis", ServiceState::Healthy));
        dispatcher.emit::<ServiceStatus>(report("detector", ServiceState::Failed));

        assert_eq!(tracker.latest_change().unwrap().service, "detector");
        assert_eq!(*seen.lock(), vec!["redis", "detector"]);
    }

    #[test]
    fn test_fed_through_normalizer() {
        let dispatcher = Dispatcher::new();
        let tracker = ServiceHealthTracker::attach(&dispatcher);
        let normalizer = Normalizer::new(dispatcher);

        assert!(normalizer.handle_message(&json!({
            "type": "service_status",
            "data": {"service": "file_watcher", "status": "restart_failed", "message": "gave up"}
        })));

        let entry = tracker.get("file_watcher").unwrap();
        assert_eq!(entry.status, ServiceState::RestartFailed);
        assert_eq!(entry.message.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_clear() {
        let dispatcher = Dispatcher::new();
        let tracker = ServiceHealthTracker::attach(&dispatcher);
        dispatcher.emit::<ServiceStatus>(report("redis", ServiceState::Failed));

        tracker.clear();
        assert!(tracker.services().is_empty());
        assert!(tracker.latest_change().is_none());
        assert!(!tracker.has_unhealthy_services());
    }
}
