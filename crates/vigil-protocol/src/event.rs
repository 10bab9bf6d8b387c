//! Tagged events and the key-to-payload binding.
//!
//! [`Event`] is the validated form of a wire message. [`EventKind`] ties a
//! catalog key to its payload type at compile time, so a subscriber for
//! `batch.analysis_completed` can only ever receive a
//! [`BatchCompletedPayload`].

use crate::catalog::EventKey;
use crate::codec::ProtocolError;
use crate::payloads::{
    BatchCompletedPayload, BatchFailedPayload, BatchStartedPayload, CameraStatusPayload,
    DetectionPayload, ErrorPayload, HeartbeatPayload, SecurityEventPayload, ServiceStatusPayload,
};
use crate::version::{MalformedVersion, Version, CATALOG_VERSION};
use serde::Deserialize;
use serde_json::Value;

/// A validated message: a catalog key together with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Security(SecurityEventPayload),
    Detection(DetectionPayload),
    Ping(HeartbeatPayload),
    Pong(HeartbeatPayload),
    ServiceStatus(ServiceStatusPayload),
    CameraStatus(CameraStatusPayload),
    BatchStarted(BatchStartedPayload),
    BatchCompleted(BatchCompletedPayload),
    BatchFailed(BatchFailedPayload),
    Error(ErrorPayload),
}

impl Event {
    /// The catalog key of this event.
    #[must_use]
    pub fn key(&self) -> EventKey {
        match self {
            Event::Security(_) => EventKey::SecurityEvent,
            Event::Detection(_) => EventKey::Detection,
            Event::Ping(_) => EventKey::Ping,
            Event::Pong(_) => EventKey::Pong,
            Event::ServiceStatus(_) => EventKey::ServiceStatus,
            Event::CameraStatus(_) => EventKey::CameraStatus,
            Event::BatchStarted(_) => EventKey::BatchAnalysisStarted,
            Event::BatchCompleted(_) => EventKey::BatchAnalysisCompleted,
            Event::BatchFailed(_) => EventKey::BatchAnalysisFailed,
            Event::Error(_) => EventKey::Error,
        }
    }

    /// Build an event from a key and an untyped payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Payload`] if the payload does not fit the
    /// shape bound to `key`.
    pub fn from_parts(key: EventKey, payload: &Value) -> Result<Self, ProtocolError> {
        fn typed<'a, T: Deserialize<'a>>(key: EventKey, payload: &'a Value) -> Result<T, ProtocolError> {
            T::deserialize(payload).map_err(|source| ProtocolError::Payload { key, source })
        }

        Ok(match key {
            EventKey::SecurityEvent => Event::Security(typed(key, payload)?),
            EventKey::Detection => Event::Detection(typed(key, payload)?),
            EventKey::Ping => Event::Ping(typed(key, payload)?),
            EventKey::Pong => Event::Pong(typed(key, payload)?),
            EventKey::ServiceStatus => Event::ServiceStatus(typed(key, payload)?),
            EventKey::CameraStatus => Event::CameraStatus(typed(key, payload)?),
            EventKey::BatchAnalysisStarted => Event::BatchStarted(typed(key, payload)?),
            EventKey::BatchAnalysisCompleted => Event::BatchCompleted(typed(key, payload)?),
            EventKey::BatchAnalysisFailed => Event::BatchFailed(typed(key, payload)?),
            EventKey::Error => Event::Error(typed(key, payload)?),
        })
    }

    /// Validate an arbitrary decoded message.
    ///
    /// The message must be an object whose `type` is a catalog key. An
    /// optional `version` must share the catalog's major version. If it has
    /// a `data` property that value is the payload, otherwise the whole
    /// message is.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first rule the message breaks.
    pub fn from_message(message: &Value) -> Result<Self, ProtocolError> {
        let object = message.as_object().ok_or(ProtocolError::NotAnObject)?;

        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        let key =
            EventKey::from_wire(tag).ok_or_else(|| ProtocolError::UnknownKey(tag.to_string()))?;

        if let Some(tag) = object.get("version") {
            let version: Version = tag
                .as_str()
                .ok_or_else(|| MalformedVersion(tag.to_string()))?
                .parse()?;
            if !CATALOG_VERSION.accepts(&version) {
                return Err(ProtocolError::IncompatibleVersion(version));
            }
        }

        let payload = object.get("data").unwrap_or(message);
        Self::from_parts(key, payload)
    }
}

/// Compile-time binding of a catalog key to exactly one payload type.
pub trait EventKind: 'static {
    /// The key this kind is dispatched under.
    const KEY: EventKey;

    /// The payload delivered to subscribers of this kind.
    type Payload: Send + Sync + 'static;

    /// Wrap a payload into an [`Event`].
    fn into_event(payload: Self::Payload) -> Event;

    /// Borrow the payload if `event` is of this kind.
    fn payload(event: &Event) -> Option<&Self::Payload>;
}

macro_rules! event_kinds {
    ($($(#[$meta:meta])* $kind:ident => $variant:ident($payload:ty) as $key:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub enum $kind {}

            impl EventKind for $kind {
                const KEY: EventKey = EventKey::$key;
                type Payload = $payload;

                fn into_event(payload: Self::Payload) -> Event {
                    Event::$variant(payload)
                }

                fn payload(event: &Event) -> Option<&Self::Payload> {
                    match event {
                        Event::$variant(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )*
    };
}

/// Marker types, one per catalog key.
pub mod kinds {
    use super::*;

    event_kinds! {
        /// `event`
        SecurityEvent => Security(SecurityEventPayload) as SecurityEvent;
        /// `detection.new`
        Detection => Detection(DetectionPayload) as Detection;
        /// `ping`
        Ping => Ping(HeartbeatPayload) as Ping;
        /// `pong`
        Pong => Pong(HeartbeatPayload) as Pong;
        /// `service_status`
        ServiceStatus => ServiceStatus(ServiceStatusPayload) as ServiceStatus;
        /// `camera_status`
        CameraStatus => CameraStatus(CameraStatusPayload) as CameraStatus;
        /// `batch.analysis_started`
        BatchStarted => BatchStarted(BatchStartedPayload) as BatchAnalysisStarted;
        /// `batch.analysis_completed`
        BatchCompleted => BatchCompleted(BatchCompletedPayload) as BatchAnalysisCompleted;
        /// `batch.analysis_failed`
        BatchFailed => BatchFailed(BatchFailedPayload) as BatchAnalysisFailed;
        /// `error`
        ErrorReport => Error(ErrorPayload) as Error;
    }
}
