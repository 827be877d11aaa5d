//! One-shot broadcast wakeups.
//!
//! A [`ConditionSignal`] keeps a registry of callbacks. [`ConditionSignal::emit`]
//! calls every callback registered at the moment of emission; waiters register a
//! one-shot callback and park until it fires.
//!
//! The registry is copy-on-write: emission iterates an immutable snapshot taken
//! under the registry lock, so listeners may register or remove themselves (or
//! each other) from inside a callback without deadlocking or tearing the
//! iteration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned by [`ConditionSignal::listen`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

struct Registry<T> {
    next: u64,
    listeners: Arc<BTreeMap<ListenerToken, Listener<T>>>,
}

pub struct ConditionSignal<T> {
    registry: Mutex<Registry<T>>,
}

impl<T: Clone + Send + 'static> ConditionSignal<T> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next: 1,
                listeners: Arc::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a callback. It stays registered until [`remove`](Self::remove)d.
    pub fn listen<F>(&self, callback: F) -> ListenerToken
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let token = ListenerToken(registry.next);
        registry.next += 1;
        Arc::make_mut(&mut registry.listeners).insert(token, Arc::new(callback));
        token
    }

    /// Deregister a callback. Unknown tokens are ignored.
    pub fn remove(&self, token: ListenerToken) {
        let mut registry = self.registry.lock();
        if registry.listeners.contains_key(&token) {
            Arc::make_mut(&mut registry.listeners).remove(&token);
        }
    }

    /// Invoke every currently registered callback with `payload`, on the caller's task.
    pub fn emit(&self, payload: T) {
        let snapshot = Arc::clone(&self.registry.lock().listeners);
        for listener in snapshot.values() {
            listener(payload.clone());
        }
    }

    /// Register a one-shot waiter now and return it without blocking.
    ///
    /// Registration is synchronous, so a caller holding its own lock can
    /// subscribe before releasing it and is guaranteed to observe the next
    /// emission.
    pub fn subscribe(&self) -> Waiter<'_, T> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let token = self.listen(move |payload| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(payload);
            }
        });
        Waiter {
            signal: self,
            token,
            rx,
        }
    }

    /// Block until the next emission and return its payload.
    pub async fn wait(&self) -> Option<T> {
        self.subscribe().fired().await
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

impl<T: Clone + Send + 'static> Default for ConditionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConditionSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionSignal")
            .field("listeners", &self.registry.lock().listeners.len())
            .finish()
    }
}

/// A registered one-shot listener. Deregisters itself when dropped.
pub struct Waiter<'a, T: Clone + Send + 'static> {
    signal: &'a ConditionSignal<T>,
    token: ListenerToken,
    rx: oneshot::Receiver<T>,
}

impl<T: Clone + Send + 'static> Waiter<'_, T> {
    /// Wait for the emission this waiter was registered for.
    ///
    /// Returns `None` only if the listener was removed before anything was emitted.
    pub async fn fired(mut self) -> Option<T> {
        (&mut self.rx).await.ok()
    }
}

impl<T: Clone + Send + 'static> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.signal.remove(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn emit_wakes_every_waiter() {
        let signal = ConditionSignal::new();
        let a = signal.subscribe();
        let b = signal.subscribe();
        assert_eq!(signal.listener_count(), 2);

        signal.emit(7u32);

        assert_eq!(a.fired().await, Some(7));
        assert_eq!(b.fired().await, Some(7));
        assert_eq!(signal.listener_count(), 0, "waiters deregister once done");
    }

    #[tokio::test]
    async fn waiter_ignores_emissions_before_it_registered() {
        let signal = Arc::new(ConditionSignal::new());
        signal.emit("early");

        let waiting = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        while signal.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        signal.emit("late");

        let got = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
        assert_eq!(got, Some("late"));
    }

    #[test]
    fn listeners_receive_until_removed() {
        let signal = ConditionSignal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let token = {
            let hits = hits.clone();
            signal.listen(move |n: usize| {
                hits.fetch_add(n, Ordering::SeqCst);
            })
        };

        signal.emit(1);
        signal.emit(2);
        signal.remove(token);
        signal.emit(100);

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removing_unknown_token_is_noop() {
        let signal: ConditionSignal<()> = ConditionSignal::new();
        let token = signal.listen(|_| {});
        signal.remove(token);
        signal.remove(token);
        signal.remove(ListenerToken(999));
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn listener_may_remove_another_during_emit() {
        let signal = Arc::new(ConditionSignal::new());
        let victim_hits = Arc::new(AtomicUsize::new(0));
        let victim = {
            let hits = victim_hits.clone();
            signal.listen(move |_: ()| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        {
            let weak = Arc::downgrade(&signal);
            signal.listen(move |_: ()| {
                if let Some(signal) = weak.upgrade() {
                    signal.remove(victim);
                }
            });
        }

        signal.emit(());
        signal.emit(());

        // The first emission still saw the victim in its snapshot.
        assert_eq!(victim_hits.load(Ordering::SeqCst), 1);
        assert_eq!(signal.listener_count(), 1);
    }

    #[test]
    fn dropped_waiter_deregisters() {
        let signal: ConditionSignal<u8> = ConditionSignal::new();
        let waiter = signal.subscribe();
        assert_eq!(signal.listener_count(), 1);
        drop(waiter);
        assert_eq!(signal.listener_count(), 0);
    }
}
