//! Core traits for the stage engine.

use std::future::Future;

use async_trait::async_trait;

use crate::stage::Stage;

/// Events flowing through a stage chain.
///
/// The engine never inspects an event; it only moves, clones (for completion
/// hooks) and shares it across tasks.
pub trait FlowEvent: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> FlowEvent for T {}

/// Consumes events at the leaf of a chain.
///
/// `T` is the event type the handler sees; it defaults to the chain's event
/// type and differs only behind a narrowing adapter. A handler may delegate
/// further by calling [`Stage::transfer`] or [`Stage::enter`] on the stage it
/// is given.
///
/// Implemented for `FnMut(Stage<E>, T) -> impl Future<Output = ()>` closures.
#[async_trait]
pub trait Handler<E: FlowEvent, T = E>: Send {
    async fn handle(&mut self, stage: &Stage<E>, event: T);
}

#[async_trait]
impl<E, T, F, Fut> Handler<E, T> for F
where
    E: FlowEvent,
    T: Send + 'static,
    F: FnMut(Stage<E>, T) -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&mut self, stage: &Stage<E>, event: T) {
        (self)(stage.clone(), event).await;
    }
}
