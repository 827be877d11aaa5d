//! In-flight accounting that gates safe teardown.

use parking_lot::Mutex;

use crate::signal::ConditionSignal;

/// Count of events a stage has dispatched downstream that are not yet settled.
///
/// The count and the zero-crossing signal are linearized: decrements emit while
/// holding the count lock, and waiters subscribe while holding it, so a waiter
/// either sees zero directly or is registered before the crossing that wakes it.
#[derive(Debug, Default)]
pub struct QuiescenceCounter {
    count: Mutex<usize>,
    zeroed: ConditionSignal<()>,
}

impl QuiescenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        *self.count.lock() += 1;
    }

    /// Subtract one. A decrement at zero is a no-op.
    pub fn decrement(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zeroed.emit(());
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the count is observed at zero.
    pub async fn wait_until_zero(&self) {
        loop {
            let waiter = {
                let count = self.count.lock();
                if *count == 0 {
                    return;
                }
                self.zeroed.subscribe()
            };
            // Re-checked on the next pass: the count may have risen again before we ran.
            waiter.fired().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn decrement_at_zero_is_noop() {
        let counter = QuiescenceCounter::new();
        counter.decrement();
        assert_eq!(counter.count(), 0);
        counter.increment();
        counter.decrement();
        counter.decrement();
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn wait_returns_immediately_at_zero() {
        let counter = QuiescenceCounter::new();
        tokio::time::timeout(Duration::from_millis(100), counter.wait_until_zero())
            .await
            .expect("zero counter should not block");
    }

    #[tokio::test]
    async fn wait_blocks_until_last_decrement() {
        let counter = Arc::new(QuiescenceCounter::new());
        counter.increment();
        counter.increment();

        let waiting = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_until_zero().await })
        };

        counter.decrement();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished(), "one event still outstanding");

        counter.decrement();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should wake on zero")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn waiter_does_not_return_on_stale_crossing() {
        let counter = Arc::new(QuiescenceCounter::new());
        counter.increment();

        let waiting = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_until_zero().await })
        };
        while counter.zeroed.listener_count() == 0 {
            tokio::task::yield_now().await;
        }

        // Cross zero and immediately re-arm before the waiter gets to run.
        {
            let mut count = counter.count.lock();
            *count -= 1;
            counter.zeroed.emit(());
            *count += 1;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished(), "waiter must re-check the count");

        counter.decrement();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
    }
}
