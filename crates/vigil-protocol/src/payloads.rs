//! Payload shapes, one per event key.
//!
//! Unknown fields are ignored so the upstream can add fields without a
//! catalog bump. Missing required fields reject the whole message.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parse an RFC 3339 timestamp into Unix epoch milliseconds.
///
/// Returns `None` for malformed input or instants before the epoch.
#[must_use]
pub fn parse_timestamp_ms(value: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
}

fn timestamp_ms(value: Option<&String>) -> Option<u64> {
    value.and_then(|s| parse_timestamp_ms(s))
}

/// Risk classification assigned by the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Status reported for a backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Healthy,
    Unhealthy,
    Restarting,
    RestartFailed,
    Failed,
    /// Any status string this catalog version does not know.
    #[serde(other)]
    Unknown,
}

impl ServiceState {
    /// Only `healthy` counts as healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, ServiceState::Healthy)
    }
}

/// Payload of `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEventPayload {
    pub id: u64,
    pub camera_id: String,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Object labels present in the event, e.g. `person`, `vehicle`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SecurityEventPayload {
    /// Event time, preferring `timestamp` over `started_at`.
    #[must_use]
    pub fn occurred_at_ms(&self) -> Option<u64> {
        timestamp_ms(self.timestamp.as_ref()).or_else(|| timestamp_ms(self.started_at.as_ref()))
    }
}

/// Payload of `detection.new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub detection_id: u64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DetectionPayload {
    #[must_use]
    pub fn timestamp_ms(&self) -> Option<u64> {
        timestamp_ms(self.timestamp.as_ref())
    }
}

/// Payload of `ping` and `pong`.
///
/// Heartbeats carry no nested body, so the payload is the message itself.
/// `kind` holds the message's own `type` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `service_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusPayload {
    pub service: String,
    pub status: ServiceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of `camera_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatusPayload {
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_name: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `batch.analysis_started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStartedPayload {
    pub batch_id: String,
    pub camera_id: String,
    pub detection_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl BatchStartedPayload {
    #[must_use]
    pub fn started_at_ms(&self) -> Option<u64> {
        timestamp_ms(self.started_at.as_ref())
    }
}

/// Payload of `batch.analysis_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCompletedPayload {
    pub batch_id: String,
    pub camera_id: String,
    pub event_id: u64,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl BatchCompletedPayload {
    #[must_use]
    pub fn completed_at_ms(&self) -> Option<u64> {
        timestamp_ms(self.completed_at.as_ref())
    }
}

/// Payload of `batch.analysis_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailedPayload {
    pub batch_id: String,
    pub camera_id: String,
    pub error: String,
    pub error_type: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

impl BatchFailedPayload {
    #[must_use]
    pub fn failed_at_ms(&self) -> Option<u64> {
        timestamp_ms(self.failed_at.as_ref())
    }
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
