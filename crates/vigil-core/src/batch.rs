//! Batch lifecycle tracking.
//!
//! Each detection batch moves through `analyzing` into exactly one terminal
//! state, `completed` or `failed`. Terminal entries are kept as bounded
//! history; in-flight entries are never evicted.

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::{Dispatcher, Handler, Subscription};
use crate::error::TrackerError;
use crate::revision::Revision;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_protocol::kinds::{BatchCompleted, BatchFailed, BatchStarted};
use vigil_protocol::{BatchCompletedPayload, BatchFailedPayload, BatchStartedPayload, RiskLevel};

/// Default number of terminal batches retained.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Analysis state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Analyzing,
    Completed,
    Failed,
}

impl BatchState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Failed)
    }
}

/// Tracked state of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: String,
    pub camera_id: String,
    pub state: BatchState,
    pub detection_count: u32,
    /// Epoch milliseconds of the last transition.
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Write order, breaks ties between equal `updated_at` values.
    #[serde(skip)]
    sequence: u64,
}

impl BatchStatus {
    fn analyzing(batch_id: &str, camera_id: &str, detection_count: u32, updated_at: u64) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            camera_id: camera_id.to_string(),
            state: BatchState::Analyzing,
            detection_count,
            updated_at,
            event_id: None,
            risk_score: None,
            risk_level: None,
            duration_ms: None,
            error: None,
            error_type: None,
            retryable: None,
            sequence: 0,
        }
    }

    fn recency(&self) -> (u64, u64) {
        (self.updated_at, self.sequence)
    }
}

/// Batch tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTrackerConfig {
    /// Maximum number of terminal batches kept.
    pub max_history: usize,
    /// Only track batches from this camera.
    pub camera_id: Option<String>,
}

impl Default for BatchTrackerConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            camera_id: None,
        }
    }
}

impl BatchTrackerConfig {
    /// # Errors
    ///
    /// Returns an error if `max_history` is zero.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.max_history == 0 {
            return Err(TrackerError::InvalidConfig("max_history must be at least 1"));
        }
        Ok(())
    }
}

pub type BatchCallback = Box<dyn Fn(&BatchStatus) + Send + Sync>;

/// Optional notifications fired after each transition.
#[derive(Default)]
pub struct BatchCallbacks {
    on_started: Option<BatchCallback>,
    on_completed: Option<BatchCallback>,
    on_failed: Option<BatchCallback>,
}

impl BatchCallbacks {
    #[must_use]
    pub fn on_started(mut self, f: impl Fn(&BatchStatus) + Send + Sync + 'static) -> Self {
        self.on_started = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_completed(mut self, f: impl Fn(&BatchStatus) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_failed(mut self, f: impl Fn(&BatchStatus) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }
}

fn notify(callback: &Option<BatchCallback>, status: &BatchStatus) {
    if let Some(callback) = callback {
        callback(status);
    }
}

struct BatchBook {
    batches: DashMap<String, BatchStatus>,
    config: BatchTrackerConfig,
    callbacks: BatchCallbacks,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    alive: AtomicBool,
    revision: Revision,
}

impl BatchBook {
    fn accepts(&self, camera_id: &str) -> bool {
        self.alive.load(Ordering::Acquire)
            && self
                .config
                .camera_id
                .as_deref()
                .map_or(true, |wanted| wanted == camera_id)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn started(&self, payload: &BatchStartedPayload) {
        if !self.accepts(&payload.camera_id) {
            return;
        }

        let updated_at = payload
            .started_at_ms()
            .unwrap_or_else(|| self.clock.now_millis());
        let mut status = BatchStatus::analyzing(
            &payload.batch_id,
            &payload.camera_id,
            payload.detection_count,
            updated_at,
        );
        status.sequence = self.next_sequence();

        self.batches.insert(payload.batch_id.clone(), status.clone());
        debug!(
            batch = %payload.batch_id,
            camera = %payload.camera_id,
            detections = payload.detection_count,
            "Batch analysis started"
        );

        self.revision.bump();
        notify(&self.callbacks.on_started, &status);
    }

    /// Move a batch into a terminal state, synthesizing an entry if the
    /// start event was never seen. Returns `None` if the batch is already
    /// terminal.
    fn finish(
        &self,
        batch_id: &str,
        camera_id: &str,
        at: Option<u64>,
        apply: impl FnOnce(&mut BatchStatus),
    ) -> Option<BatchStatus> {
        let updated_at = at.unwrap_or_else(|| self.clock.now_millis());
        let status = {
            let mut entry = self.batches.entry(batch_id.to_string()).or_insert_with(|| {
                debug!(batch = %batch_id, "Terminal event without start, synthesizing entry");
                BatchStatus::analyzing(batch_id, camera_id, 0, updated_at)
            });

            if entry.state.is_terminal() {
                debug!(batch = %batch_id, state = ?entry.state, "Batch already terminal, ignoring");
                return None;
            }

            let status = entry.value_mut();
            apply(status);
            status.updated_at = updated_at;
            status.sequence = self.next_sequence();
            status.clone()
        };

        self.evict();
        self.revision.bump();
        Some(status)
    }

    fn completed(&self, payload: &BatchCompletedPayload) {
        if !self.accepts(&payload.camera_id) {
            return;
        }

        let finished = self.finish(
            &payload.batch_id,
            &payload.camera_id,
            payload.completed_at_ms(),
            |status| {
                status.state = BatchState::Completed;
                status.event_id = Some(payload.event_id);
                status.risk_score = Some(payload.risk_score);
                status.risk_level = Some(payload.risk_level);
                status.duration_ms = Some(payload.duration_ms);
            },
        );

        if let Some(status) = finished {
            info!(
                batch = %status.batch_id,
                event = payload.event_id,
                risk = payload.risk_score,
                "Batch analysis completed"
            );
            notify(&self.callbacks.on_completed, &status);
        }
    }

    fn failed(&self, payload: &BatchFailedPayload) {
        if !self.accepts(&payload.camera_id) {
            return;
        }

        let finished = self.finish(
            &payload.batch_id,
            &payload.camera_id,
            payload.failed_at_ms(),
            |status| {
                status.state = BatchState::Failed;
                status.error = Some(payload.error.clone());
                status.error_type = Some(payload.error_type.clone());
                status.retryable = Some(payload.retryable);
            },
        );

        if let Some(status) = finished {
            warn!(
                batch = %status.batch_id,
                error = %payload.error,
                error_type = %payload.error_type,
                retryable = payload.retryable,
                "Batch analysis failed"
            );
            notify(&self.callbacks.on_failed, &status);
        }
    }

    /// Drop the oldest terminal entries beyond `max_history`.
    fn evict(&self) -> usize {
        let mut terminal: Vec<((u64, u64), String)> = self
            .batches
            .iter()
            .filter(|entry| entry.state.is_terminal())
            .map(|entry| (entry.recency(), entry.key().clone()))
            .collect();

        if terminal.len() <= self.config.max_history {
            return 0;
        }

        terminal.sort_unstable();
        let excess = terminal.len() - self.config.max_history;
        for (_, batch_id) in terminal.into_iter().take(excess) {
            self.batches.remove(&batch_id);
            debug!(batch = %batch_id, "Evicted terminal batch");
        }
        excess
    }

    fn newest_first(&self, filter: impl Fn(&BatchStatus) -> bool) -> Vec<BatchStatus> {
        let mut batches: Vec<BatchStatus> = self
            .batches
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        batches.sort_unstable_by_key(|b| std::cmp::Reverse(b.recency()));
        batches
    }
}

/// Tracks batch analysis state from the dispatcher.
///
/// Subscriptions are released when the tracker is dropped.
pub struct BatchTracker {
    book: Arc<BatchBook>,
    subscriptions: Vec<Subscription>,
}

impl BatchTracker {
    /// Attach a tracker to `dispatcher` with the system clock and no callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn attach(dispatcher: &Dispatcher, config: BatchTrackerConfig) -> Result<Self, TrackerError> {
        Self::with_options(dispatcher, config, BatchCallbacks::default(), Arc::new(SystemClock))
    }

    /// Attach a tracker with callbacks and a custom clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_options(
        dispatcher: &Dispatcher,
        config: BatchTrackerConfig,
        callbacks: BatchCallbacks,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        let book = Arc::new(BatchBook {
            batches: DashMap::new(),
            config,
            callbacks,
            clock,
            sequence: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            revision: Revision::new(),
        });

        let started = Arc::clone(&book);
        let completed = Arc::clone(&book);
        let failed = Arc::clone(&book);

        let subscriptions = vec![
            dispatcher.on(&Handler::<BatchStarted>::named("batch-tracker", move |p| {
                started.started(p);
                Ok(())
            })),
            dispatcher.on(&Handler::<BatchCompleted>::named("batch-tracker", move |p| {
                completed.completed(p);
                Ok(())
            })),
            dispatcher.on(&Handler::<BatchFailed>::named("batch-tracker", move |p| {
                failed.failed(p);
                Ok(())
            })),
        ];

        info!(max_history = book.config.max_history, camera = ?book.config.camera_id, "Batch tracker attached");
        Ok(Self { book, subscriptions })
    }

    /// Batches still being analyzed, newest first.
    #[must_use]
    pub fn processing_batches(&self) -> Vec<BatchStatus> {
        self.book.newest_first(|b| b.state == BatchState::Analyzing)
    }

    /// Completed batches, newest first.
    #[must_use]
    pub fn completed_batches(&self) -> Vec<BatchStatus> {
        self.book.newest_first(|b| b.state == BatchState::Completed)
    }

    /// Failed batches, newest first.
    #[must_use]
    pub fn failed_batches(&self) -> Vec<BatchStatus> {
        self.book.newest_first(|b| b.state == BatchState::Failed)
    }

    /// Every tracked batch, newest first.
    #[must_use]
    pub fn all_batches(&self) -> Vec<BatchStatus> {
        self.book.newest_first(|_| true)
    }

    /// Number of batches still being analyzed.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.book
            .batches
            .iter()
            .filter(|entry| entry.state == BatchState::Analyzing)
            .count()
    }

    #[must_use]
    pub fn get(&self, batch_id: &str) -> Option<BatchStatus> {
        self.book.batches.get(batch_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.book.batches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.book.batches.is_empty()
    }

    /// Forget every tracked batch.
    pub fn clear(&self) {
        self.book.batches.clear();
        self.book.revision.bump();
    }

    /// Watch the revision counter, bumped after every change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.book.revision.subscribe()
    }
}

impl Drop for BatchTracker {
    fn drop(&mut self) {
        self.book.alive.store(false, Ordering::Release);
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        debug!("Batch tracker detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;
    use vigil_protocol::EventKey;

    fn started(batch_id: &str, detection_count: u32) -> BatchStartedPayload {
        BatchStartedPayload {
            batch_id: batch_id.to_string(),
            camera_id: "front_door".to_string(),
            detection_count,
            started_at: None,
        }
    }

    fn completed(batch_id: &str, risk_score: u32) -> BatchCompletedPayload {
        BatchCompletedPayload {
            batch_id: batch_id.to_string(),
            camera_id: "front_door".to_string(),
            event_id: 7,
            risk_score,
            risk_level: RiskLevel::High,
            duration_ms: 1_500,
            completed_at: None,
        }
    }

    fn failed(batch_id: &str) -> BatchFailedPayload {
        BatchFailedPayload {
            batch_id: batch_id.to_string(),
            camera_id: "front_door".to_string(),
            error: "model timeout".to_string(),
            error_type: "timeout".to_string(),
            retryable: true,
            failed_at: None,
        }
    }

    fn tracker(dispatcher: &Dispatcher, max_history: usize) -> (BatchTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let tracker = BatchTracker::with_options(
            dispatcher,
            BatchTrackerConfig {
                max_history,
                camera_id: None,
            },
            BatchCallbacks::default(),
            clock.clone(),
        )
        .unwrap();
        (tracker, clock)
    }

    #[test]
    fn test_start_then_complete() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);

        dispatcher.emit::<BatchStarted>(started("b1", 5));
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.processing_batches()[0].batch_id, "b1");

        dispatcher.emit::<BatchCompleted>(completed("b1", 70));
        assert_eq!(tracker.len(), 1);

        let status = tracker.get("b1").unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.detection_count, 5);
        assert_eq!(status.risk_score, Some(70));
        assert_eq!(status.event_id, Some(7));
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.completed_batches().len(), 1);
    }

    #[test]
    fn test_failure_attaches_error() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);

        dispatcher.emit::<BatchStarted>(started("b1", 3));
        dispatcher.emit::<BatchFailed>(failed("b1"));

        let status = tracker.get("b1").unwrap();
        assert_eq!(status.state, BatchState::Failed);
        assert_eq!(status.detection_count, 3);
        assert_eq!(status.error.as_deref(), Some("model timeout"));
        assert_eq!(status.retryable, Some(true));
        assert_eq!(tracker.failed_batches().len(), 1);
    }

    #[test]
    fn test_completion_without_start_is_synthesized() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);

        dispatcher.emit::<BatchCompleted>(completed("orphan", 20));

        let status = tracker.get("orphan").unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.detection_count, 0);
        assert_eq!(status.camera_id, "front_door");
        assert_eq!(status.updated_at, 1_000);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);

        dispatcher.emit::<BatchCompleted>(completed("b1", 20));
        dispatcher.emit::<BatchFailed>(failed("b1"));

        let status = tracker.get("b1").unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_history_bound_spares_analyzing() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher, 2);

        dispatcher.emit::<BatchStarted>(started("in-flight", 1));
        for id in ["b1", "b2", "b3"] {
            clock.advance(1_000);
            dispatcher.emit::<BatchStarted>(started(id, 1));
            dispatcher.emit::<BatchCompleted>(completed(id, 10));
        }

        let completed: Vec<String> = tracker
            .completed_batches()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(completed, vec!["b3", "b2"]);
        assert!(tracker.get("b1").is_none());
        assert_eq!(tracker.get("in-flight").unwrap().state, BatchState::Analyzing);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_eviction_with_equal_timestamps_uses_write_order() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 1);

        dispatcher.emit::<BatchFailed>(failed("first"));
        dispatcher.emit::<BatchFailed>(failed("second"));

        assert!(tracker.get("first").is_none());
        assert!(tracker.get("second").is_some());
    }

    #[test]
    fn test_event_timestamps_are_used() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);

        let mut payload = started("b1", 2);
        payload.started_at = Some("1970-01-01T00:00:05Z".to_string());
        dispatcher.emit::<BatchStarted>(payload);
        assert_eq!(tracker.get("b1").unwrap().updated_at, 5_000);
    }

    #[test]
    fn test_newest_first_ordering() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher, 50);

        dispatcher.emit::<BatchStarted>(started("old", 1));
        clock.advance(10);
        dispatcher.emit::<BatchStarted>(started("new", 1));

        let ids: Vec<String> = tracker
            .processing_batches()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_camera_filter() {
        let dispatcher = Dispatcher::new();
        let tracker = BatchTracker::attach(
            &dispatcher,
            BatchTrackerConfig {
                max_history: 10,
                camera_id: Some("garage".to_string()),
            },
        )
        .unwrap();

        dispatcher.emit::<BatchStarted>(started("b1", 1));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_callbacks_fire() {
        let dispatcher = Dispatcher::new();
        let log: Arc<Mutex<Vec<(String, BatchState)>>> = Arc::default();
        let (a, b, c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));

        let callbacks = BatchCallbacks::default()
            .on_started(move |s| a.lock().push((s.batch_id.clone(), s.state)))
            .on_completed(move |s| b.lock().push((s.batch_id.clone(), s.state)))
            .on_failed(move |s| c.lock().push((s.batch_id.clone(), s.state)));
        let _tracker = BatchTracker::with_options(
            &dispatcher,
            BatchTrackerConfig::default(),
            callbacks,
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        dispatcher.emit::<BatchStarted>(started("b1", 1));
        dispatcher.emit::<BatchCompleted>(completed("b1", 1));
        dispatcher.emit::<BatchFailed>(failed("b2"));

        assert_eq!(
            *log.lock(),
            vec![
                ("b1".to_string(), BatchState::Analyzing),
                ("b1".to_string(), BatchState::Completed),
                ("b2".to_string(), BatchState::Failed),
            ]
        );
    }

    #[test]
    fn test_drop_detaches() {
        let dispatcher = Dispatcher::new();
        let tracker = BatchTracker::attach(&dispatcher, BatchTrackerConfig::default()).unwrap();
        assert!(dispatcher.has(EventKey::BatchAnalysisStarted));

        drop(tracker);
        assert!(dispatcher.events().is_empty());
    }

    #[test]
    fn test_changes_are_signalled() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher, 50);
        let rx = tracker.changes();

        dispatcher.emit::<BatchStarted>(started("b1", 1));
        dispatcher.emit::<BatchCompleted>(completed("b1", 1));
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn test_invalid_config() {
        let config = BatchTrackerConfig {
            max_history: 0,
            camera_id: None,
        };
        assert!(BatchTracker::attach(&Dispatcher::new(), config).is_err());
    }
}
