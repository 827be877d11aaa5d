//! Typed adapters binding the generic engine to a concrete event vocabulary.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::stage::Stage;
use crate::traits::{FlowEvent, Handler};

/// Narrowing of a chain event into one of its variants.
///
/// Implement with an exhaustive `match` over the event enum.
pub trait Narrow<T> {
    fn narrow(self) -> Option<T>;
}

/// Handler that ignores events which do not narrow to `T`.
pub struct Narrowed<H, T> {
    handler: H,
    _narrowed: PhantomData<fn(T)>,
}

/// Wrap a handler for one event variant as a handler for the whole chain.
pub fn narrowed<H, T>(handler: H) -> Narrowed<H, T> {
    Narrowed {
        handler,
        _narrowed: PhantomData,
    }
}

#[async_trait]
impl<E, T, H> Handler<E> for Narrowed<H, T>
where
    E: FlowEvent + Narrow<T>,
    T: Send + 'static,
    H: Handler<E, T>,
{
    async fn handle(&mut self, stage: &Stage<E>, event: E) {
        if let Some(narrowed) = event.narrow() {
            self.handler.handle(stage, narrowed).await;
        }
    }
}

impl<H, T> fmt::Debug for Narrowed<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Narrowed").finish_non_exhaustive()
    }
}

/// Events that carry a dispatch key (a keyboard key, a command name, …).
pub trait Keyed {
    type Key: Eq + Hash + Send + Sync + 'static;

    fn key(&self) -> Option<Self::Key>;
}

type Binding<E> = Box<dyn FnMut(Stage<E>) -> BoxFuture<'static, ()> + Send>;

/// Dispatch-by-key handler. Events without a binding are ignored.
pub struct Keymap<E: Keyed> {
    bindings: HashMap<E::Key, Binding<E>>,
}

impl<E: FlowEvent + Keyed> Keymap<E> {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Run `action` whenever an event with `key` arrives. Rebinding replaces.
    pub fn bind<F, Fut>(mut self, key: E::Key, mut action: F) -> Self
    where
        F: FnMut(Stage<E>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.bindings
            .insert(key, Box::new(move |stage: Stage<E>| action(stage).boxed()));
        self
    }

    pub fn is_bound(&self, key: &E::Key) -> bool {
        self.bindings.contains_key(key)
    }
}

impl<E: FlowEvent + Keyed> Default for Keymap<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: FlowEvent + Keyed> Handler<E> for Keymap<E> {
    async fn handle(&mut self, stage: &Stage<E>, event: E) {
        let Some(key) = event.key() else { return };
        if let Some(action) = self.bindings.get_mut(&key) {
            action(stage.clone()).await;
        }
    }
}

impl<E: Keyed> fmt::Debug for Keymap<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keymap")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
