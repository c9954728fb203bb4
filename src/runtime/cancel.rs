//! Cooperative cancellation for steps and retry sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::EngineError;

/// Cheap-to-clone cancellation flag observed between retry attempts and
/// during retry sleeps.
///
/// Backed by a `watch` channel so sleepers wake immediately on cancel rather
/// than polling.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Mark the token cancelled, waking all sleepers.
    pub fn cancel(&self) {
        // send_replace updates the value even when no sleeper subscribes,
        // so a pre-execution cancel is still observed later.
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.sender.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives inside `self`, so `changed` cannot observe a
            // dropped channel while we are borrowing it.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep that terminates early with a cancellation error.
    pub async fn sleep(&self, duration: Duration, reason: &str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::cancelled(reason));
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(EngineError::cancelled(reason)),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
