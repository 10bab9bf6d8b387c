//! Change signal for derived views.
//!
//! Each tracker bumps its revision after every state change. Presentation
//! code watches the counter and re-reads the views it cares about.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Revision {
    tx: watch::Sender<u64>,
}

impl Revision {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Record a state change.
    pub fn bump(&self) {
        self.tx.send_modify(|rev| *rev += 1);
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Watch for changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}
