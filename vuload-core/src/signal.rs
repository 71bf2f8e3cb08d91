use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot, level-triggered flag that tasks can poll or await.
#[derive(Debug, Default)]
pub struct Signal {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the signal was already set.
    pub fn trigger(&self) -> bool {
        let first = !self.set.swap(true, Ordering::AcqRel);
        self.notify.notify_waiters();
        first
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Requests cooperative cancellation of a run. Cloneable and safe to trigger from anywhere,
/// including a signal handler task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: Arc<Signal>,
}

impl CancelHandle {
    pub(crate) fn new(signal: Arc<Signal>) -> Self {
        Self { signal }
    }

    pub fn cancel(&self) {
        if self.signal.trigger() {
            tracing::info!("cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_set()
    }
}
