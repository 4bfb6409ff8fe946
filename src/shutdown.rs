//! Cooperative cancellation: every task observes a shared `is_closed` flag
//! and unwinds at its next suspension point. A plain `Arc<AtomicBool>` alone
//! only gets noticed the next time a task happens to wake up on its own;
//! pairing it with a `tokio::sync::Notify` lets `close()` wake every
//! sleeping task immediately instead of waiting out its current backoff.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct Shutdown {
    closed: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Sleep for `duration`, returning early if `close()` is called.
    /// Returns `true` if the sleep ran to completion, `false` if cancelled.
    pub async fn sleep_or_closed(&self, duration: std::time::Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_closed(),
            _ = self.notify.notified() => false,
        }
    }

    /// Wait until `close()` is called. Returns immediately if already closed.
    pub async fn wait_closed(&self) {
        if self.is_closed() {
            return;
        }
        self.notify.notified().await;
    }
}
