//! # vigil-protocol
//!
//! Message catalog and wire decoding for the Vigil monitoring core.
//!
//! Every upstream message is `{ "type": <key>, "data"?: <payload> }`. This
//! crate owns the closed set of keys, the payload shape bound to each key,
//! and the boundary validation that turns an untrusted decoded value into a
//! typed [`Event`].
//!
//! ## Example
//!
//! ```rust
//! use vigil_protocol::{Event, EventKey};
//! use serde_json::json;
//!
//! let event = Event::from_message(&json!({
//!     "type": "service_status",
//!     "data": {"service": "detector", "status": "unhealthy"}
//! }))
//! .unwrap();
//! assert_eq!(event.key(), EventKey::ServiceStatus);
//!
//! assert!(Event::from_message(&json!({"type": "bogus"})).is_err());
//! ```

pub mod catalog;
pub mod codec;
pub mod event;
pub mod payloads;
pub mod version;

pub use catalog::EventKey;
pub use codec::{decode, decode_event, ProtocolError, RawFrame};
pub use event::{kinds, Event, EventKind};
pub use payloads::*;
pub use version::{MalformedVersion, Version, CATALOG_VERSION};
