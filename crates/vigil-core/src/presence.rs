//! Zone presence tracking.
//!
//! Keeps the most recent sighting of each roster member in one tracked
//! zone. Staleness is derived at read time and never stored; records are
//! dropped only by the periodic sweep or when the tracked zone changes.

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::{Dispatcher, Handler, Subscription};
use crate::error::TrackerError;
use crate::revision::Revision;
use crate::roster::{DetectionRef, FirstEligibleMatcher, PresenceMatcher, RosterMember};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use vigil_protocol::kinds::{Detection, SecurityEvent};

/// Default age after which a sighting is stale (5 minutes).
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 300_000;

/// Default age up to which a member counts as active (30 seconds).
pub const DEFAULT_ACTIVE_THRESHOLD_MS: u64 = 30_000;

/// Default sweep period (1 minute).
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

/// Presence tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Zone whose presence is tracked.
    pub zone_id: String,
    pub stale_threshold_ms: u64,
    pub active_threshold_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl PresenceConfig {
    #[must_use]
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
            active_threshold_ms: DEFAULT_ACTIVE_THRESHOLD_MS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the active window exceeds the stale window or the
    /// cleanup interval is zero.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.active_threshold_ms > self.stale_threshold_ms {
            return Err(TrackerError::InvalidConfig(
                "active_threshold_ms must not exceed stale_threshold_ms",
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(TrackerError::InvalidConfig("cleanup_interval_ms must be non-zero"));
        }
        Ok(())
    }

    /// Records older than this are removed by the sweep.
    #[must_use]
    pub fn retention_ms(&self) -> u64 {
        self.stale_threshold_ms.saturating_mul(2)
    }
}

/// Most recent sighting of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonePresenceRecord {
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Epoch milliseconds of the sighting.
    pub timestamp: u64,
    pub zone_id: String,
}

/// A record with read-time freshness flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    #[serde(flatten)]
    pub record: ZonePresenceRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    pub age_ms: u64,
    pub is_stale: bool,
    pub is_active: bool,
}

struct PresenceBook {
    records: DashMap<String, ZonePresenceRecord>,
    zone_id: RwLock<String>,
    roster: RwLock<Vec<RosterMember>>,
    matcher: Box<dyn PresenceMatcher>,
    config: PresenceConfig,
    clock: Arc<dyn Clock>,
    alive: AtomicBool,
    revision: Revision,
}

impl PresenceBook {
    fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Record a sighting if the detection matches a roster member.
    fn observe(&self, detection: &DetectionRef<'_>, occurred_at: Option<u64>) -> bool {
        if !self.is_live() {
            return false;
        }

        let zone_id = self.zone_id.read().clone();
        if detection.zone_id.is_some_and(|zone| zone != zone_id) {
            trace!(zone = ?detection.zone_id, tracked = %zone_id, "Detection outside tracked zone");
            return false;
        }

        let member_id = {
            let roster = self.roster.read();
            match self.matcher.match_detection(detection, &roster) {
                Some(member) => member.id.clone(),
                None => return false,
            }
        };

        let timestamp = occurred_at.unwrap_or_else(|| self.clock.now_millis());
        let record = ZonePresenceRecord {
            member_id: member_id.clone(),
            entity_id: detection.entity_id.map(str::to_string),
            timestamp,
            zone_id,
        };

        {
            let mut entry = self.records.entry(member_id.clone()).or_insert_with(|| record.clone());
            if entry.timestamp > timestamp {
                trace!(member = %member_id, "Older sighting ignored");
                return false;
            }
            *entry = record;
        }

        debug!(member = %member_id, timestamp, "Member sighted");
        self.revision.bump();
        true
    }

    fn sweep(&self) -> usize {
        if !self.is_live() {
            return 0;
        }

        let now = self.clock.now_millis();
        let retention = self.config.retention_ms();
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.timestamp) <= retention);
        let removed = before - self.records.len();

        if removed > 0 {
            debug!(removed, "Swept expired presence records");
            self.revision.bump();
        }
        removed
    }

    fn view(&self, record: &ZonePresenceRecord, now: u64) -> PresenceView {
        let age_ms = now.saturating_sub(record.timestamp);
        let member_name = self
            .roster
            .read()
            .iter()
            .find(|member| member.id == record.member_id)
            .map(|member| member.name.clone());

        PresenceView {
            record: record.clone(),
            member_name,
            age_ms,
            is_stale: age_ms > self.config.stale_threshold_ms,
            is_active: age_ms <= self.config.active_threshold_ms,
        }
    }
}

/// Tracks which roster members were recently seen in one zone.
pub struct ZonePresenceTracker {
    book: Arc<PresenceBook>,
    subscriptions: Vec<Subscription>,
}

impl ZonePresenceTracker {
    /// Attach a tracker with the default matcher and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn attach(
        dispatcher: &Dispatcher,
        config: PresenceConfig,
        roster: Vec<RosterMember>,
    ) -> Result<Self, TrackerError> {
        Self::with_options(
            dispatcher,
            config,
            roster,
            Box::new(FirstEligibleMatcher),
            Arc::new(SystemClock),
        )
    }

    /// Attach a tracker with a custom matcher and clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_options(
        dispatcher: &Dispatcher,
        config: PresenceConfig,
        roster: Vec<RosterMember>,
        matcher: Box<dyn PresenceMatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        let book = Arc::new(PresenceBook {
            records: DashMap::new(),
            zone_id: RwLock::new(config.zone_id.clone()),
            roster: RwLock::new(roster),
            matcher,
            config,
            clock,
            alive: AtomicBool::new(true),
            revision: Revision::new(),
        });

        let detections = Arc::clone(&book);
        let events = Arc::clone(&book);

        let subscriptions = vec![
            dispatcher.on(&Handler::<Detection>::named("zone-presence", move |p| {
                let detection = DetectionRef {
                    label: &p.label,
                    entity_id: p.entity_id.as_deref(),
                    zone_id: p.zone_id.as_deref(),
                };
                detections.observe(&detection, p.timestamp_ms());
                Ok(())
            })),
            dispatcher.on(&Handler::<SecurityEvent>::named("zone-presence", move |p| {
                let occurred_at = p.occurred_at_ms();
                for label in &p.object_types {
                    let detection = DetectionRef {
                        label,
                        entity_id: p.entity_id.as_deref(),
                        zone_id: p.zone_id.as_deref(),
                    };
                    if events.observe(&detection, occurred_at) {
                        break;
                    }
                }
                Ok(())
            })),
        ];

        info!(zone = %book.config.zone_id, "Zone presence tracker attached");
        Ok(Self {
            book,
            subscriptions,
        })
    }

    /// The zone currently tracked.
    #[must_use]
    pub fn zone_id(&self) -> String {
        self.book.zone_id.read().clone()
    }

    /// Track a different zone. All records of the previous zone are dropped.
    pub fn set_zone(&self, zone_id: impl Into<String>) {
        let zone_id = zone_id.into();
        {
            let mut current = self.book.zone_id.write();
            if *current == zone_id {
                return;
            }
            *current = zone_id.clone();
        }
        self.book.records.clear();
        self.book.revision.bump();
        info!(zone = %zone_id, "Tracked zone changed");
    }

    /// Replace the roster. Existing records are kept.
    pub fn set_roster(&self, roster: Vec<RosterMember>) {
        *self.book.roster.write() = roster;
        self.book.revision.bump();
    }

    /// Members seen in the zone, most recent first.
    #[must_use]
    pub fn members(&self) -> Vec<PresenceView> {
        self.members_at(self.book.clock.now_millis())
    }

    /// Members seen in the zone as of `now`, most recent first.
    #[must_use]
    pub fn members_at(&self, now: u64) -> Vec<PresenceView> {
        let mut views: Vec<PresenceView> = self
            .book
            .records
            .iter()
            .map(|entry| self.book.view(entry.value(), now))
            .collect();
        views.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then_with(|| a.record.member_id.cmp(&b.record.member_id))
        });
        views
    }

    #[must_use]
    pub fn get(&self, member_id: &str) -> Option<PresenceView> {
        let now = self.book.clock.now_millis();
        self.book
            .records
            .get(member_id)
            .map(|entry| self.book.view(entry.value(), now))
    }

    /// Number of members with a retained sighting.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.book.records.len()
    }

    /// Number of members seen within the active window.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.members().iter().filter(|view| view.is_active).count()
    }

    /// Remove records older than twice the stale threshold.
    pub fn sweep(&self) -> usize {
        self.book.sweep()
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start_sweeper(&self) -> PresenceSweeper {
        PresenceSweeper::spawn(
            Arc::downgrade(&self.book),
            Duration::from_millis(self.book.config.cleanup_interval_ms),
        )
    }

    /// Watch the revision counter, bumped after every change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.book.revision.subscribe()
    }
}

impl Drop for ZonePresenceTracker {
    fn drop(&mut self) {
        self.book.alive.store(false, Ordering::Release);
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        debug!("Zone presence tracker detached");
    }
}

/// Periodic presence sweep, stopped when dropped.
///
/// The task holds only a weak reference to the tracker and exits on its
/// own once the tracker is gone.
#[derive(Debug)]
pub struct PresenceSweeper {
    handle: JoinHandle<()>,
}

impl PresenceSweeper {
    fn spawn(book: Weak<PresenceBook>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(book) = book.upgrade() else {
                    break;
                };
                if !book.is_live() {
                    break;
                }
                book.sweep();
            }
            debug!("Presence sweeper stopped");
        });

        Self { handle }
    }

    /// Whether the sweep task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the sweep.
    pub fn stop(self) {}
}

impl Drop for PresenceSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::normalizer::Normalizer;
    use crate::roster::MemberRole;
    use serde_json::json;
    use vigil_protocol::{DetectionPayload, EventKey};

    const STALE: u64 = 300_000;
    const ACTIVE: u64 = 30_000;

    fn roster() -> Vec<RosterMember> {
        vec![
            RosterMember::new("m-alex", "Alex", MemberRole::Resident),
            RosterMember::new("m-sam", "Sam", MemberRole::Family),
        ]
    }

    fn detection(label: &str) -> DetectionPayload {
        DetectionPayload {
            detection_id: 1,
            label: label.to_string(),
            confidence: Some(0.9),
            camera_id: Some("front_door".to_string()),
            entity_id: Some("ent-1".to_string()),
            zone_id: None,
            timestamp: None,
        }
    }

    fn tracker(dispatcher: &Dispatcher) -> (ZonePresenceTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let tracker = ZonePresenceTracker::with_options(
            dispatcher,
            PresenceConfig::new("porch"),
            roster(),
            Box::new(FirstEligibleMatcher),
            clock.clone(),
        )
        .unwrap();
        (tracker, clock)
    }

    #[test]
    fn test_person_detection_records_sighting() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);

        dispatcher.emit::<Detection>(detection("person"));
        dispatcher.emit::<Detection>(detection("car"));

        let members = tracker.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].record.member_id, "m-alex");
        assert_eq!(members[0].record.zone_id, "porch");
        assert_eq!(members[0].record.entity_id.as_deref(), Some("ent-1"));
        assert_eq!(members[0].record.timestamp, 1_000_000);
        assert_eq!(members[0].member_name.as_deref(), Some("Alex"));
        assert!(members[0].is_active);
        assert!(!members[0].is_stale);
    }

    #[test]
    fn test_event_time_preferred_over_receipt() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);

        let mut payload = detection("person");
        payload.timestamp = Some("1970-01-01T00:16:00Z".to_string());
        dispatcher.emit::<Detection>(payload);

        assert_eq!(tracker.get("m-alex").unwrap().record.timestamp, 960_000);
    }

    #[test]
    fn test_threshold_boundaries() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        dispatcher.emit::<Detection>(detection("person"));

        let at_active = &tracker.members_at(1_000_000 + ACTIVE)[0];
        assert!(at_active.is_active);
        let past_active = &tracker.members_at(1_000_000 + ACTIVE + 1)[0];
        assert!(!past_active.is_active);

        let at_stale = &tracker.members_at(1_000_000 + STALE)[0];
        assert!(!at_stale.is_stale);
        let past_stale = &tracker.members_at(1_000_000 + STALE + 1)[0];
        assert!(past_stale.is_stale);
    }

    #[test]
    fn test_zone_change_clears_records() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        dispatcher.emit::<Detection>(detection("person"));
        assert_eq!(tracker.present_count(), 1);

        tracker.set_zone("backyard");
        assert!(tracker.members().is_empty());
        assert_eq!(tracker.zone_id(), "backyard");
    }

    #[test]
    fn test_same_zone_keeps_records() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        dispatcher.emit::<Detection>(detection("person"));

        tracker.set_zone("porch");
        assert_eq!(tracker.present_count(), 1);
    }

    #[test]
    fn test_detection_in_other_zone_ignored() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);

        let mut payload = detection("person");
        payload.zone_id = Some("driveway".to_string());
        dispatcher.emit::<Detection>(payload);
        assert_eq!(tracker.present_count(), 0);

        let mut payload = detection("person");
        payload.zone_id = Some("porch".to_string());
        dispatcher.emit::<Detection>(payload);
        assert_eq!(tracker.present_count(), 1);
    }

    #[test]
    fn test_only_latest_sighting_kept() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher);

        dispatcher.emit::<Detection>(detection("person"));
        clock.advance(5_000);
        dispatcher.emit::<Detection>(detection("person"));
        assert_eq!(tracker.present_count(), 1);
        assert_eq!(tracker.get("m-alex").unwrap().record.timestamp, 1_005_000);

        let mut late = detection("person");
        late.timestamp = Some("1970-01-01T00:00:01Z".to_string());
        dispatcher.emit::<Detection>(late);
        assert_eq!(tracker.get("m-alex").unwrap().record.timestamp, 1_005_000);
    }

    #[test]
    fn test_security_event_with_person() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        let normalizer = Normalizer::new(dispatcher.clone());

        assert!(normalizer.handle_message(&json!({
            "type": "event",
            "data": {
                "id": 3,
                "camera_id": "front_door",
                "risk_score": 10,
                "risk_level": "low",
                "summary": "Resident arriving",
                "object_types": ["car", "person"]
            }
        })));
        assert_eq!(tracker.present_count(), 1);
    }

    #[test]
    fn test_sweep_uses_double_stale_threshold() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher);
        dispatcher.emit::<Detection>(detection("person"));

        clock.advance(2 * STALE);
        assert_eq!(tracker.sweep(), 0);
        assert!(tracker.members()[0].is_stale);

        clock.advance(1);
        assert_eq!(tracker.sweep(), 1);
        assert_eq!(tracker.present_count(), 0);
    }

    #[test]
    fn test_active_count() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher);
        dispatcher.emit::<Detection>(detection("person"));

        assert_eq!(tracker.active_count(), 1);
        clock.advance(ACTIVE + 1);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.present_count(), 1);
    }

    #[test]
    fn test_custom_matcher() {
        struct ByEntity;
        impl PresenceMatcher for ByEntity {
            fn match_detection<'r>(
                &self,
                detection: &DetectionRef<'_>,
                roster: &'r [RosterMember],
            ) -> Option<&'r RosterMember> {
                let entity = detection.entity_id?;
                roster.iter().find(|m| m.id == entity)
            }
        }

        let dispatcher = Dispatcher::new();
        let tracker = ZonePresenceTracker::with_options(
            &dispatcher,
            PresenceConfig::new("porch"),
            roster(),
            Box::new(ByEntity),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        let mut payload = detection("dog");
        payload.entity_id = Some("m-sam".to_string());
        dispatcher.emit::<Detection>(payload);
        assert_eq!(tracker.members()[0].record.member_id, "m-sam");
    }

    #[test]
    fn test_invalid_config() {
        let mut config = PresenceConfig::new("porch");
        config.active_threshold_ms = config.stale_threshold_ms + 1;
        assert!(ZonePresenceTracker::attach(&Dispatcher::new(), config, vec![]).is_err());

        let mut config = PresenceConfig::new("porch");
        config.cleanup_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_drop_detaches() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        assert!(dispatcher.has(EventKey::Detection));
        drop(tracker);
        assert!(!dispatcher.has(EventKey::Detection));
        assert!(!dispatcher.has(EventKey::SecurityEvent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically() {
        let dispatcher = Dispatcher::new();
        let (tracker, clock) = tracker(&dispatcher);
        let sweeper = tracker.start_sweeper();
        dispatcher.emit::<Detection>(detection("person"));

        clock.advance(2 * STALE + 1);
        tokio::time::sleep(Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS + 1)).await;

        assert_eq!(tracker.present_count(), 0);
        assert!(sweeper.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_exits_after_tracker_dropped() {
        let dispatcher = Dispatcher::new();
        let (tracker, _) = tracker(&dispatcher);
        let sweeper = tracker.start_sweeper();

        drop(tracker);
        tokio::time::sleep(Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS + 1)).await;
        tokio::task::yield_now().await;

        assert!(!sweeper.is_running());
    }
}
