//! Process-wide shutdown latch.
//!
//! Any holder may trigger it (the manager's `ServerQuit`, Ctrl-C in the host
//! binary, or `RunningServer::shutdown`). The acceptor waits on it and then
//! runs the shutdown sequence exactly once.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Latch the signal. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                return false;
            }
            *triggered = true;
            true
        })
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been triggered (immediately if it already was).
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
