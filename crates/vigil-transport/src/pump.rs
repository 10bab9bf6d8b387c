//! Drive a source into a delivery callback.

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::traits::{MessageSource, TransportError};

/// Counters for one pump run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpStats {
    /// Messages handed to the callback.
    pub delivered: u64,
    /// Frames that could not be decoded.
    pub undecodable: u64,
}

/// Deliver every message from `source` to `deliver`, one at a time.
///
/// The next message is not read until `deliver` returns. Undecodable
/// frames are logged and skipped. `connected` mirrors the source's
/// connection flag and is left `false` when the pump returns.
///
/// # Errors
///
/// Returns the first unrecoverable transport error.
pub async fn pump<S, F>(
    source: &mut S,
    connected: &watch::Sender<bool>,
    mut deliver: F,
) -> Result<PumpStats, TransportError>
where
    S: MessageSource + ?Sized,
    F: FnMut(&Value),
{
    let mut stats = PumpStats::default();
    connected.send_replace(source.is_connected());
    info!(source = source.name(), "Pump started");

    let result = loop {
        match source.next_message().await {
            Ok(Some(message)) => {
                deliver(&message);
                stats.delivered += 1;
            }
            Ok(None) => {
                debug!(source = source.name(), "Source closed");
                break Ok(stats);
            }
            Err(err) if err.is_recoverable() => {
                stats.undecodable += 1;
                debug!(source = source.name(), error = %err, "Skipping undecodable frame");
            }
            Err(err) => {
                warn!(source = source.name(), error = %err, "Source failed");
                break Err(err);
            }
        }
        connected.send_if_modified(|flag| {
            let now = source.is_connected();
            let changed = *flag != now;
            *flag = now;
            changed
        });
    };

    connected.send_replace(false);
    info!(
        source = source.name(),
        delivered = stats.delivered,
        undecodable = stats.undecodable,
        "Pump stopped"
    );
    result
}
