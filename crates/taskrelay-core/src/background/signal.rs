//! One-shot completion signal for background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Event-like flag a waiter can suspend on until a task finishes.
///
/// Once set it stays set until [`clear`](Self::clear); waiters arriving late
/// return immediately.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.fired.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until set. Returns `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a concurrent `set` is not missed.
                notified.as_mut().enable();
                if self.is_set() {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }
}
