//! One-shot release gate between consecutive operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// A gate that opens exactly once.
///
/// The queue worker waits on it after starting an operation. The operation
/// releases it when the hardware is ready for the next call. Releasing an
/// already released gate does nothing, whichever thread does it.
#[derive(Debug, Default)]
pub struct QueueSemaphore {
    released: AtomicBool,
    notify: Notify,
}

impl QueueSemaphore {
    /// Create a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate. Returns `true` only for the call that opened it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            trace!("Queue semaphore already released");
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Whether the gate was opened.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Wait until the gate is opened.
    ///
    /// Wakeups are re-checked against the flag, so the wait only ends once
    /// [`release`](Self::release) was really called.
    pub async fn await_release(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }

            notified.await;
        }
    }
}

/// The handle an operation uses to release its queue.
#[derive(Debug, Clone)]
pub struct QueueReleaser {
    semaphore: Arc<QueueSemaphore>,
}

impl QueueReleaser {
    /// Create a releaser for the given gate.
    pub fn new(semaphore: Arc<QueueSemaphore>) -> Self {
        Self { semaphore }
    }

    /// Let the queue start the next operation.
    pub fn release(&self) {
        self.semaphore.release();
    }

    /// Whether the queue was already released.
    pub fn is_released(&self) -> bool {
        self.semaphore.is_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_release_is_idempotent() {
        let semaphore = QueueSemaphore::new();

        assert!(!semaphore.is_released());
        assert!(semaphore.release());
        assert!(!semaphore.release());
        assert!(semaphore.is_released());
    }

    #[test]
    fn test_await_blocks_until_release() {
        let semaphore = QueueSemaphore::new();
        let mut wait = task::spawn(semaphore.await_release());

        assert_pending!(wait.poll());
        assert_pending!(wait.poll());

        semaphore.release();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_await_after_release_is_immediate() {
        let semaphore = QueueSemaphore::new();
        semaphore.release();

        let mut wait = task::spawn(semaphore.await_release());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_releaser_shares_gate() {
        let semaphore = Arc::new(QueueSemaphore::new());
        let releaser = QueueReleaser::new(semaphore.clone());
        let clone = releaser.clone();

        clone.release();
        releaser.release();

        assert!(releaser.is_released());
        assert!(semaphore.is_released());
    }

    #[tokio::test]
    async fn test_concurrent_release() {
        let semaphore = Arc::new(QueueSemaphore::new());
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move { semaphore.release() }));
        }

        let mut opened = 0;
        for task in tasks {
            if task.await.unwrap_or(false) {
                opened += 1;
            }
        }

        assert_eq!(opened, 1);
        semaphore.await_release().await;
    }
}
