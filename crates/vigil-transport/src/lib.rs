//! # vigil-transport
//!
//! Upstream message sources for Vigil.
//!
//! This crate provides a uniform interface over where backend messages
//! come from:
//!
//! - **Channel** - In-process queue, for replay and tests
//! - **WebSocket** - Client connection to the event backend
//!
//! ## Source Abstraction
//!
//! All sources implement [`MessageSource`]. [`pump`] drives a source into
//! a callback, one message at a time.
//!
//! ```rust,ignore
//! use vigil_transport::{pump, WebSocketSource};
//!
//! let mut source = WebSocketSource::connect("ws://localhost:8000/ws/events").await?;
//! pump(&mut source, &connected, |message| {
//!     normalizer.handle_message(message);
//! })
//! .await?;
//! ```

pub mod channel;
pub mod pump;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{ChannelSender, ChannelSource};
pub use pump::{pump, PumpStats};
pub use traits::{MessageSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketSource;
