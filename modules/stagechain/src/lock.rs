//! Binary mutual exclusion with scoped release.

use std::future::Future;

use tokio::sync::{Mutex, MutexGuard};

/// Held for as long as the guard lives; dropping it releases the lock.
pub type ExclusiveGuard<'a> = MutexGuard<'a, ()>;

#[derive(Debug, Default)]
pub struct ExclusiveLock {
    inner: Mutex<()>,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> ExclusiveGuard<'_> {
        self.inner.lock().await
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<ExclusiveGuard<'_>> {
        self.inner.try_lock().ok()
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Run `work` with the lock held.
    ///
    /// The guard lives inside this future, so the lock is released however
    /// `work` ends: normally, by panic, or by the caller dropping the future.
    pub async fn run_exclusive<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.acquire().await;
        work.await
    }

    /// Like [`run_exclusive`](Self::run_exclusive), but gives up immediately
    /// (returning `None`, without polling `work`) if the lock is taken.
    pub async fn try_run_exclusive<F>(&self, work: F) -> Option<F::Output>
    where
        F: Future,
    {
        let _guard = self.try_acquire()?;
        Some(work.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn run_exclusive_serializes_callers() {
        let lock = Arc::new(ExclusiveLock::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = {
            let (lock, log) = (lock.clone(), log.clone());
            tokio::spawn(async move {
                lock.run_exclusive(async {
                    log.lock().push("first:start");
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    log.lock().push("first:end");
                })
                .await;
            })
        };
        while !lock.is_held() {
            tokio::task::yield_now().await;
        }
        lock.run_exclusive(async {
            log.lock().push("second");
        })
        .await;
        first.await.expect("task should not panic");

        assert_eq!(*log.lock(), vec!["first:start", "first:end", "second"]);
    }

    #[tokio::test]
    async fn lock_is_released_when_work_panics() {
        let lock = ExclusiveLock::new();
        let outcome = AssertUnwindSafe(lock.run_exclusive(async {
            panic!("boom");
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err(), "panic should propagate to the caller");
        assert!(lock.try_acquire().is_some(), "lock must be free after a panic");
    }

    #[tokio::test]
    async fn try_run_refuses_when_held() {
        let lock = ExclusiveLock::new();
        let _held = lock.acquire().await;
        let ran = lock.try_run_exclusive(async { 1 }).await;
        assert_eq!(ran, None);
    }

    #[tokio::test]
    async fn lock_is_released_when_future_is_dropped() {
        let lock = ExclusiveLock::new();
        let pending = lock.run_exclusive(std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert!(!lock.is_held(), "dropping the future releases the lock");
    }
}
