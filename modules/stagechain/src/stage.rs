//! Stage: one node of a delegation chain.
//!
//! A stage owns a single-slot buffer, a quiescence counter and at most one live
//! child. Parent links are fixed at creation; the child slot is only read and
//! written under the stage's own child lock.
//!
//! Accounting rule: an event sitting in a stage's buffer has been counted once
//! by every strict ancestor of that stage (each relay that forwarded it). It is
//! settled, decrementing all of them exactly once, when its handler returns,
//! when its handler opens a nested delegation, or when it is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::buffer::{Buffer, Push};
use crate::counter::QuiescenceCounter;
use crate::lock::ExclusiveLock;
use crate::options::Hook;
use crate::traits::FlowEvent;

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stage identifier, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(u64);

impl StageId {
    fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`Stage::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The root was already stopped; the event was discarded.
    Dropped,
}

/// Cheap, cloneable handle to a stage.
pub struct Stage<E> {
    pub(crate) inner: Arc<StageInner<E>>,
}

pub(crate) struct StageInner<E> {
    id: StageId,
    depth: usize,
    pub(crate) buffer: Buffer<E>,
    pub(crate) counter: QuiescenceCounter,
    pub(crate) lock: ExclusiveLock,
    parent: Option<Stage<E>>,
    child: Mutex<Option<Stage<E>>>,
    /// Set while this stage's consumption loop holds an unsettled event.
    in_hand: AtomicBool,
    pub(crate) on_event_ended: Option<Hook<E>>,
}

impl<E: FlowEvent> Stage<E> {
    /// A new, parentless stage. Events sent anywhere in its chain land here.
    pub fn root() -> Self {
        Self::create(None, None)
    }

    pub(crate) fn create(parent: Option<Stage<E>>, on_event_ended: Option<Hook<E>>) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth() + 1);
        let stage = Self {
            inner: Arc::new(StageInner {
                id: StageId::next(),
                depth,
                buffer: Buffer::new(),
                counter: QuiescenceCounter::new(),
                lock: ExclusiveLock::new(),
                parent,
                child: Mutex::new(None),
                in_hand: AtomicBool::new(false),
                on_event_ended,
            }),
        };
        trace!(stage = %stage.id(), depth, "Stage created");
        stage
    }

    pub fn id(&self) -> StageId {
        self.inner.id
    }

    /// Distance from the root (the root is 0).
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn parent(&self) -> Option<&Stage<E>> {
        self.inner.parent.as_ref()
    }

    /// The live child, if this stage is delegating.
    pub fn child(&self) -> Option<Stage<E>> {
        self.inner.child.lock().clone()
    }

    pub fn has_child(&self) -> bool {
        self.inner.child.lock().is_some()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.buffer.is_closed()
    }

    /// Events this stage forwarded that are not yet settled downstream.
    pub fn pending(&self) -> usize {
        self.inner.counter.count()
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Stage<E>> {
        std::iter::successors(self.parent(), |stage| stage.parent())
    }

    pub fn root_of(&self) -> &Stage<E> {
        self.ancestors().last().unwrap_or(self)
    }

    pub fn same_stage(&self, other: &Stage<E>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Deliver `event` to the root of this chain, waiting for buffer room.
    ///
    /// If the root is (or becomes) stopped the event is discarded and
    /// [`Delivery::Dropped`] is returned; that race with cancellation is benign.
    pub async fn send(&self, event: E) -> Delivery {
        let root = self.root_of();
        match root.inner.buffer.push(event).await {
            Push::Delivered => Delivery::Accepted,
            Push::Closed(_) => {
                debug!(stage = %root.id(), "Root stopped, dropping sent event");
                Delivery::Dropped
            }
        }
    }

    /// Close this stage's buffer. Does not touch ancestors or descendants.
    /// Idempotent.
    pub fn stop(&self) {
        if self.inner.buffer.close() {
            trace!(stage = %self.id(), depth = self.depth(), "Stage stopped");
        }
    }

    /// Stop this stage and every descendant, once nothing it dispatched is in flight.
    ///
    /// Descendants are stopped deepest first, this stage last.
    ///
    /// A handler must not await this on one of its own ancestors: the event it
    /// is handling still counts as in flight there, so the wait never ends.
    /// Use [`cancel`](Self::cancel) from inside handlers.
    pub async fn stop_all(&self) {
        self.inner.counter.wait_until_zero().await;
        self.stop_subtree();
    }

    /// Request [`stop_all`](Self::stop_all) without waiting for it.
    pub fn cancel(&self) -> JoinHandle<()> {
        let stage = self.clone();
        tokio::spawn(async move { stage.stop_all().await })
    }

    pub(crate) fn stop_subtree(&self) {
        // Collect first; teardown clears child slots while we walk.
        let mut chain = vec![self.clone()];
        while let Some(next) = chain.last().and_then(Stage::child) {
            chain.push(next);
        }
        debug!(stage = %self.id(), stages = chain.len(), "Stopping subtree");
        for stage in chain.iter().rev() {
            stage.stop();
        }
    }

    /// Settle one event that was sitting in this stage's buffer.
    pub(crate) fn settle(&self) {
        for ancestor in self.ancestors() {
            ancestor.inner.counter.decrement();
        }
    }

    pub(crate) fn hold(&self) {
        self.inner.in_hand.store(true, Ordering::Release);
    }

    /// Settle the event held by this stage's consumption loop, if any.
    pub(crate) fn settle_in_hand(&self) {
        if self.inner.in_hand.swap(false, Ordering::AcqRel) {
            self.settle();
        }
    }

    pub(crate) fn set_child(&self, child: &Stage<E>) -> bool {
        let mut slot = self.inner.child.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(child.clone());
        true
    }

    pub(crate) fn clear_child(&self) {
        self.inner.child.lock().take();
    }
}

impl<E> Clone for Stage<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Stage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("stopped", &self.inner.buffer.is_closed())
            .field("pending", &self.inner.counter.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_routes_to_root() {
        let root = Stage::<u32>::root();
        let child = Stage::create(Some(root.clone()), None);
        let grandchild = Stage::create(Some(child.clone()), None);

        assert_eq!(grandchild.depth(), 2);
        assert!(grandchild.root_of().same_stage(&root));
        assert_eq!(grandchild.send(5).await, Delivery::Accepted);

        assert_eq!(root.inner.buffer.pull().await, Some(5));
        assert!(child.inner.buffer.drain().is_empty());
    }

    #[tokio::test]
    async fn send_to_stopped_root_is_dropped() {
        let root = Stage::<u32>::root();
        let child = Stage::create(Some(root.clone()), None);
        root.stop();
        assert_eq!(child.send(1).await, Delivery::Dropped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let root = Stage::<u32>::root();
        root.stop();
        root.stop();
        assert!(root.is_stopped());
        tokio::time::timeout(Duration::from_millis(100), root.stop_all())
            .await
            .expect("stopping a stopped stage should not block");
    }

    #[tokio::test]
    async fn stop_all_waits_for_outstanding_events() {
        let root = Stage::<u32>::root();
        let child = Stage::create(Some(root.clone()), None);
        assert!(root.set_child(&child));
        root.inner.counter.increment();

        let stopping = root.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished(), "one event still in flight");
        assert!(!child.is_stopped());

        child.settle();
        stopping.await.expect("task should not panic");
        assert!(child.is_stopped() && root.is_stopped());
    }

    #[test]
    fn settle_decrements_every_ancestor_once() {
        let root = Stage::<u32>::root();
        let mid = Stage::create(Some(root.clone()), None);
        let leaf = Stage::create(Some(mid.clone()), None);
        root.inner.counter.increment();
        mid.inner.counter.increment();

        leaf.hold();
        leaf.settle_in_hand();
        leaf.settle_in_hand();

        assert_eq!((root.pending(), mid.pending()), (0, 0));
    }

    #[test]
    fn only_one_child_slot() {
        let root = Stage::<u32>::root();
        let a = Stage::create(Some(root.clone()), None);
        let b = Stage::create(Some(root.clone()), None);
        assert!(root.set_child(&a));
        assert!(!root.set_child(&b));
        root.clear_child();
        assert!(!root.has_child());
    }
}
