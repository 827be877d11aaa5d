//! Delegation: hand all future events of a stage to a new child until it exits.
//!
//! parent buffer → relay task (interrupts) → child buffer → child consumption
//! loop (handler, completion hooks, settle) → …

use std::future::Future;
use std::panic;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::buffer::Push;
use crate::error::{FlowError, Result};
use crate::interrupt::{Cancel, Control, Interrupt};
use crate::options::{compose, Options};
use crate::stage::Stage;
use crate::traits::{FlowEvent, Handler};

impl<E: FlowEvent> Stage<E> {
    /// Delegate every future event of this stage to a new child consumed by
    /// `handler`, until the child is stopped.
    ///
    /// Returns once the child's consumption loop has ended and the child is torn
    /// down; this stage can then delegate again. Fails with
    /// [`FlowError::AlreadyDelegating`] if the stage already has a live child.
    pub async fn transfer<H>(&self, handler: H, options: Options<E>) -> Result<()>
    where
        H: Handler<E>,
    {
        self.delegate(options, move |child| async move { child.consume(handler).await })
            .await
    }

    /// Delegate to a new child and run `body` against it.
    ///
    /// The body usually issues one or more sequential [`transfer`](Self::transfer)s
    /// on the child. The child lives until the body returns; events it received
    /// but never forwarded are then discarded.
    pub async fn enter<F, Fut>(&self, options: Options<E>, body: F) -> Result<()>
    where
        F: FnOnce(Stage<E>) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        self.delegate(options, body).await
    }

    async fn delegate<F, Fut>(&self, options: Options<E>, body: F) -> Result<()>
    where
        F: FnOnce(Stage<E>) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        if self.is_stopped() {
            debug!(stage = %self.id(), "Delegation requested on stopped stage");
            return if options.strict {
                Err(FlowError::Stopped { stage: self.id() })
            } else {
                Ok(())
            };
        }

        match self
            .inner
            .lock
            .try_run_exclusive(self.delegate_locked(options, body))
            .await
        {
            Some(result) => result,
            None => {
                warn!(stage = %self.id(), "Concurrent delegation on the same stage");
                Err(FlowError::AlreadyDelegating { stage: self.id() })
            }
        }
    }

    async fn delegate_locked<F, Fut>(&self, options: Options<E>, body: F) -> Result<()>
    where
        F: FnOnce(Stage<E>) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let Options {
            interrupts,
            on_event_ended,
            ..
        } = options;

        let child = Stage::create(
            Some(self.clone()),
            compose(self.inner.on_event_ended.clone(), on_event_ended),
        );
        if !self.set_child(&child) {
            return Err(FlowError::AlreadyDelegating { stage: self.id() });
        }
        // The event that triggered this delegation is done being routed.
        self.settle_in_hand();

        let kill = CancellationToken::new();
        let relay = tokio::spawn(relay(self.clone(), child.clone(), interrupts, kill.clone()));
        let teardown = Teardown {
            parent: self,
            child: &child,
            kill: &kill,
        };
        debug!(parent = %self.id(), child = %child.id(), depth = child.depth(), "Delegating");

        body(child.clone()).await;

        // Settling leftovers before the relay is joined lets a relay parked on
        // this stage's quiescence proceed.
        drop(teardown);
        if let Err(err) = relay.await {
            if err.is_panic() {
                panic::resume_unwind(err.into_panic());
            }
        }

        debug!(parent = %self.id(), child = %child.id(), "Delegation finished");
        Ok(())
    }

    /// Consumption loop: runs until this stage is stopped and its buffer drained.
    async fn consume<H>(&self, mut handler: H)
    where
        H: Handler<E>,
    {
        while let Some(event) = self.inner.buffer.pull().await {
            self.hold();
            match &self.inner.on_event_ended {
                Some(hook) => {
                    let seen = event.clone();
                    handler.handle(self, event).await;
                    hook(&seen);
                }
                None => handler.handle(self, event).await,
            }
            self.settle_in_hand();
        }
    }

    /// Handle one event taken from this stage's buffer by its relay.
    async fn forward(
        &self,
        child: &Stage<E>,
        interrupts: &[Arc<dyn Interrupt<E>>],
        kill: &CancellationToken,
        event: E,
    ) {
        let mut swallowed = false;
        for interrupt in interrupts {
            let mut control = Control::default();
            interrupt.inspect(&event, &mut control);
            match control.take() {
                Some(Cancel::Stage) => {
                    swallowed = true;
                    if self.quiesce(kill).await {
                        child.stop_all().await;
                    }
                }
                Some(Cancel::Next) => {
                    // Only after quiescence: an event already forwarded may be
                    // about to open the delegation this request targets.
                    if !self.quiesce(kill).await {
                        swallowed = true;
                    } else if let Some(grandchild) = child.child() {
                        grandchild.stop_all().await;
                        swallowed = true;
                    }
                }
                None => {}
            }
        }

        if swallowed || self.is_stopped() || kill.is_cancelled() {
            self.settle();
            trace!(stage = %self.id(), swallowed, "Event not forwarded");
            return;
        }

        self.inner.counter.increment();
        if let Push::Closed(_) = child.inner.buffer.push(event).await {
            self.inner.counter.decrement();
            self.settle();
            debug!(stage = %child.id(), "Child stopped before delivery, event dropped");
        }
    }

    /// Wait until nothing this stage forwarded is in flight. `false` if the
    /// delegation was torn down first.
    async fn quiesce(&self, kill: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = kill.cancelled() => false,
            _ = self.inner.counter.wait_until_zero() => true,
        }
    }
}

/// Forward events from `parent` into `child` until either is stopped or the
/// delegation ends.
async fn relay<E: FlowEvent>(
    parent: Stage<E>,
    child: Stage<E>,
    interrupts: Vec<Arc<dyn Interrupt<E>>>,
    kill: CancellationToken,
) {
    trace!(parent = %parent.id(), child = %child.id(), "Relay started");
    loop {
        // Events still queued when a side stops stay with the parent.
        let next = tokio::select! {
            biased;
            _ = kill.cancelled() => None,
            _ = child.inner.buffer.closed() => None,
            _ = parent.inner.buffer.closed() => None,
            event = parent.inner.buffer.pull() => event,
        };
        let Some(event) = next else { break };
        parent.forward(&child, &interrupts, &kill, event).await;
    }
    trace!(parent = %parent.id(), child = %child.id(), "Relay stopped");
}

/// Restores the parent to "no active child" on every exit path, unwinding
/// included: stops the child, settles whatever is left in its buffer, kills
/// the relay and clears the child slot.
struct Teardown<'a, E: FlowEvent> {
    parent: &'a Stage<E>,
    child: &'a Stage<E>,
    kill: &'a CancellationToken,
}

impl<E: FlowEvent> Drop for Teardown<'_, E> {
    fn drop(&mut self) {
        self.child.stop();
        for _ in self.child.inner.buffer.drain() {
            self.child.settle();
            trace!(stage = %self.child.id(), "Discarded event left in finished stage");
        }
        self.kill.cancel();
        self.parent.clear_child();
    }
}
