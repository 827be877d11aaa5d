//! Event sources and the entry pump that feeds a chain's root.

use std::future::Future;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::options::Options;
use crate::stage::{Delivery, Stage};
use crate::traits::{FlowEvent, Handler};

/// Supplies raw events to the entry pump.
#[async_trait]
pub trait Source<E>: Send {
    /// The next event, or `None` once the source is permanently exhausted.
    async fn next_event(&mut self) -> Option<E>;
}

#[async_trait]
impl<E: Send> Source<E> for mpsc::Receiver<E> {
    async fn next_event(&mut self) -> Option<E> {
        self.recv().await
    }
}

/// Source over any iterator.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(events: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: events.into_iter(),
        }
    }
}

#[async_trait]
impl<E, I> Source<E> for IterSource<I>
where
    E: Send,
    I: Iterator<Item = E> + Send,
{
    async fn next_event(&mut self) -> Option<E> {
        self.iter.next()
    }
}

/// Source over any stream.
#[derive(Debug)]
pub struct StreamSource<S> {
    stream: S,
}

impl<S: Stream + Unpin> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<E, S> Source<E> for StreamSource<S>
where
    E: Send,
    S: Stream<Item = E> + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<E> {
        self.stream.next().await
    }
}

/// Source over a blocking polling function, run on the blocking pool.
pub struct PollFn<F> {
    poll: Option<F>,
}

/// Wrap a blocking poll function (a terminal read, a device poll, …) as a [`Source`].
pub fn poll_fn<E, F>(poll: F) -> PollFn<F>
where
    F: FnMut() -> Option<E> + Send + 'static,
{
    PollFn { poll: Some(poll) }
}

#[async_trait]
impl<E, F> Source<E> for PollFn<F>
where
    E: Send + 'static,
    F: FnMut() -> Option<E> + Send + 'static,
{
    async fn next_event(&mut self) -> Option<E> {
        let mut poll = self.poll.take()?;
        let polled = tokio::task::spawn_blocking(move || {
            let event = poll();
            (poll, event)
        })
        .await;

        match polled {
            Ok((poll, event)) => {
                if event.is_some() {
                    self.poll = Some(poll);
                }
                event
            }
            Err(err) => {
                warn!(error = %err, "Blocking source failed");
                None
            }
        }
    }
}

/// Feed every event from `source` into `root` until the source is exhausted
/// or the root is stopped.
pub fn spawn_pump<E, S>(root: Stage<E>, mut source: S) -> JoinHandle<()>
where
    E: FlowEvent,
    S: Source<E> + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = source.next_event().await {
            if root.send(event).await == Delivery::Dropped {
                debug!(stage = %root.id(), "Root stopped, pump exiting");
                return;
            }
        }
        debug!(stage = %root.id(), "Source exhausted");
    })
}

/// Run `handler` against a fresh chain fed by `source`.
///
/// Returns when the top-level child is stopped, typically by an interrupt in
/// `options` reacting to a terminating event. Exhausting the source alone does
/// not end the session.
pub async fn start<E, S, H>(source: S, options: Options<E>, handler: H) -> Result<()>
where
    E: FlowEvent,
    S: Source<E> + 'static,
    H: Handler<E>,
{
    let root = Stage::root();
    let pump = spawn_pump(root.clone(), source);
    let result = root.transfer(handler, options).await;
    shut_down(&root, pump).await;
    result
}

/// Like [`start`], but runs `body` against the top-level child (see [`Stage::enter`]).
pub async fn open<E, S, F, Fut>(source: S, options: Options<E>, body: F) -> Result<()>
where
    E: FlowEvent,
    S: Source<E> + 'static,
    F: FnOnce(Stage<E>) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let root = Stage::root();
    let pump = spawn_pump(root.clone(), source);
    let result = root.enter(options, body).await;
    shut_down(&root, pump).await;
    result
}

async fn shut_down<E: FlowEvent>(root: &Stage<E>, pump: JoinHandle<()>) {
    root.stop();
    pump.abort();
    if let Err(err) = pump.await {
        if err.is_panic() {
            warn!(stage = %root.id(), "Entry pump panicked");
        }
    }
    let dropped = root.inner.buffer.drain().len();
    if dropped > 0 {
        debug!(stage = %root.id(), dropped, "Discarded events left at the root");
    }
}
