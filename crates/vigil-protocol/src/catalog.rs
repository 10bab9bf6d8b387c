//! The event key catalog.
//!
//! Every message on the wire carries a string `type` discriminant. The set of
//! accepted discriminants is closed: a key outside [`EventKey::ALL`] is never
//! dispatched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message discriminants understood by Vigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKey {
    /// A security event was created by the analysis pipeline.
    #[serde(rename = "event")]
    SecurityEvent,
    /// A raw object detection from a camera.
    #[serde(rename = "detection.new")]
    Detection,
    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping,
    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong,
    /// A backend service changed status.
    #[serde(rename = "service_status")]
    ServiceStatus,
    /// A camera changed status.
    #[serde(rename = "camera_status")]
    CameraStatus,
    /// A detection batch entered analysis.
    #[serde(rename = "batch.analysis_started")]
    BatchAnalysisStarted,
    /// A detection batch finished analysis.
    #[serde(rename = "batch.analysis_completed")]
    BatchAnalysisCompleted,
    /// A detection batch failed analysis.
    #[serde(rename = "batch.analysis_failed")]
    BatchAnalysisFailed,
    /// Server-side error report.
    #[serde(rename = "error")]
    Error,
}

impl EventKey {
    /// Every key in the catalog, in declaration order.
    pub const ALL: [EventKey; 10] = [
        EventKey::SecurityEvent,
        EventKey::Detection,
        EventKey::Ping,
        EventKey::Pong,
        EventKey::ServiceStatus,
        EventKey::CameraStatus,
        EventKey::BatchAnalysisStarted,
        EventKey::BatchAnalysisCompleted,
        EventKey::BatchAnalysisFailed,
        EventKey::Error,
    ];

    /// The wire discriminant for this key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKey::SecurityEvent => "event",
            EventKey::Detection => "detection.new",
            EventKey::Ping => "ping",
            EventKey::Pong => "pong",
            EventKey::ServiceStatus => "service_status",
            EventKey::CameraStatus => "camera_status",
            EventKey::BatchAnalysisStarted => "batch.analysis_started",
            EventKey::BatchAnalysisCompleted => "batch.analysis_completed",
            EventKey::BatchAnalysisFailed => "batch.analysis_failed",
            EventKey::Error => "error",
        }
    }

    /// Look up a key by its wire discriminant.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == value)
    }

    /// Whether this key is a bare control message (no nested body expected).
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, EventKey::Ping | EventKey::Pong)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKey {
    type Err = UnknownEventKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| UnknownEventKey(s.to_string()))
    }
}

/// A discriminant that is not part of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event key: {0}")]
pub struct UnknownEventKey(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        for key in EventKey::ALL {
            let encoded = serde_json::to_value(key).unwrap();
            assert_eq!(encoded, serde_json::Value::String(key.as_str().into()));
            assert_eq!(EventKey::from_wire(key.as_str()), Some(key));
        }
    }

    #[test]
    fn test_unknown_key() {
        assert_eq!(EventKey::from_wire("bogus"), None);
        assert!("batch.analysis".parse::<EventKey>().is_err());
        assert_eq!(
            "batch.analysis_failed".parse::<EventKey>(),
            Ok(EventKey::BatchAnalysisFailed)
        );
    }

    #[test]
    fn test_control_keys() {
        assert!(EventKey::Ping.is_control());
        assert!(!EventKey::Error.is_control());
    }
}
