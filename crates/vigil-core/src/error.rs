//! Tracker errors.

use thiserror::Error;

/// Errors raised while constructing a tracker.
///
/// Event handling itself never fails; only configuration can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// A configuration value is out of range.
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(&'static str),
}
