//! # vigil-core
//!
//! Typed event dispatch and stateful projections for the Vigil monitor.
//!
//! This crate provides the building blocks between the transport and the
//! consumers of realtime backend events:
//!
//! - **Normalizer** - Validates untrusted messages into typed events
//! - **Dispatcher** - Fault-isolated, typed publish/subscribe
//! - **Batch** - Lifecycle of analysis batches
//! - **Health** - Latest status per backend service
//! - **Presence** - Recently seen roster members in one zone
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Normalizer  │────▶│ Dispatcher  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                         ┌──────────────────────┼──────────────────────┐
//!                         ▼                      ▼                      ▼
//!                  ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//!                  │    Batch    │        │   Health    │        │  Presence   │
//!                  └─────────────┘        └─────────────┘        └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use vigil_core::{Dispatcher, Normalizer, ServiceHealthTracker};
//!
//! let dispatcher = Dispatcher::new();
//! let health = ServiceHealthTracker::attach(&dispatcher);
//! let normalizer = Normalizer::new(dispatcher);
//!
//! normalizer.handle_message(&json!({
//!     "type": "service_status",
//!     "data": {"service": "redis", "status": "unhealthy"}
//! }));
//! assert!(health.has_unhealthy_services());
//! ```

pub mod batch;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod normalizer;
pub mod presence;
pub mod revision;
pub mod roster;

pub use batch::{BatchCallbacks, BatchState, BatchStatus, BatchTracker, BatchTrackerConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    Dispatcher, DispatcherStats, Handler, HandlerError, HandlerResult, Subscription,
};
pub use error::TrackerError;
pub use health::{ServiceHealthTracker, ServiceStatusEntry};
pub use normalizer::{Normalizer, NormalizerStats};
pub use presence::{
    PresenceConfig, PresenceSweeper, PresenceView, ZonePresenceRecord, ZonePresenceTracker,
};
pub use revision::Revision;
pub use roster::{
    DetectionRef, FirstEligibleMatcher, MemberRole, PresenceMatcher, RosterMember,
};
