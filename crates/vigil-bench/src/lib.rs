//! Message fixtures shared by the Vigil benchmarks.

use serde_json::{json, Value};

/// A `batch.analysis_started` message.
#[must_use]
pub fn batch_started(n: u64) -> Value {
    json!({
        "type": "batch.analysis_started",
        "data": {
            "batch_id": format!("batch-{n}"),
            "camera_id": "front_door",
            "detection_count": 3,
            "started_at": "2024-01-15T10:00:00Z"
        }
    })
}

/// A `batch.analysis_completed` message.
#[must_use]
pub fn batch_completed(n: u64) -> Value {
    json!({
        "type": "batch.analysis_completed",
        "data": {
            "batch_id": format!("batch-{n}"),
            "camera_id": "front_door",
            "event_id": n,
            "risk_score": 40,
            "risk_level": "medium",
            "duration_ms": 1200,
            "completed_at": "2024-01-15T10:00:02Z"
        }
    })
}

/// A `service_status` message.
#[must_use]
pub fn service_status(service: &str, status: &str) -> Value {
    json!({
        "type": "service_status",
        "data": {"service": service, "status": status}
    })
}

/// A `detection.new` message for a person in `zone`.
#[must_use]
pub fn person_detection(n: u64, zone: &str) -> Value {
    json!({
        "type": "detection.new",
        "data": {
            "detection_id": n,
            "label": "person",
            "confidence": 0.92,
            "camera_id": "front_door",
            "zone_id": zone
        }
    })
}

/// A representative mix of upstream traffic.
#[must_use]
pub fn mixed_stream(len: u64) -> Vec<Value> {
    (0..len)
        .map(|n| match n % 5 {
            0 => batch_started(n),
            1 => batch_completed(n - 1),
            2 => service_status("detector", if n % 2 == 0 { "healthy" } else { "restarting" }),
            3 => person_detection(n, "porch"),
            _ => json!({"type": "ping"}),
        })
        .collect()
}
