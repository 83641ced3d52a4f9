//! Process-wide count of dispatched-but-unfinished flushes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counter the shutdown drain watches to know when every dispatched flush
/// has fully resolved, dump fallback included.
///
/// Increments happen synchronously at dispatch time; the matching decrement
/// is tied to a [`FlushGuard`] so it cannot be skipped, even if the flush
/// task panics.
#[derive(Debug, Default)]
pub struct PendingFlushes {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingFlushes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one dispatched flush. Dropping the guard completes it.
    pub fn begin(self: &Arc<Self>) -> FlushGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        FlushGuard {
            pending: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the counter reaches zero.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII handle for one in-flight flush.
#[derive(Debug)]
pub struct FlushGuard {
    pending: Arc<PendingFlushes>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if self.pending.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pending.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn guard_decrements_on_drop() {
        let pending = PendingFlushes::new();
        let a = pending.begin();
        let b = pending.begin();
        assert_eq!(pending.count(), 2);

        drop(a);
        assert_eq!(pending.count(), 1);
        drop(b);
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test]
    async fn wait_zero_returns_immediately_when_idle() {
        let pending = PendingFlushes::new();
        pending.wait_zero().await;
    }

    #[tokio::test]
    async fn wait_zero_wakes_when_last_guard_drops() {
        let pending = PendingFlushes::new();
        let guard = pending.begin();

        let waiter = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move { pending.wait_zero().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once count hits zero")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn guard_decrements_even_if_task_panics() {
        let pending = PendingFlushes::new();
        let guard = pending.begin();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("flush blew up");
        });
        let _ = task.await;

        assert_eq!(pending.count(), 0);
    }
}
