use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::interrupt::Interrupt;
use crate::traits::FlowEvent;

/// Callback run once after a stage fully processes an event.
pub type Hook<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Per-delegation options.
pub struct Options<E> {
    pub(crate) interrupts: Vec<Arc<dyn Interrupt<E>>>,
    pub(crate) on_event_ended: Option<Hook<E>>,
    pub(crate) strict: bool,
}

impl<E: FlowEvent> Options<E> {
    pub fn new() -> Self {
        Self {
            interrupts: Vec::new(),
            on_event_ended: None,
            strict: false,
        }
    }

    /// Defaults taken from process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new().strict(config.strict)
    }

    /// Run `hook` after every event the new child (or any of its descendants)
    /// fully processes.
    ///
    /// Hooks accumulate down the chain: a stage runs its ancestors' hooks
    /// first, then its own. Calling this twice composes both hooks.
    pub fn with_event_ended<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_event_ended = compose(self.on_event_ended.take(), Some(Arc::new(hook)));
        self
    }

    /// Inspect every event on the relay before it reaches the child.
    /// Interrupts run in the order they were added.
    pub fn with_interrupt<I>(mut self, interrupt: I) -> Self
    where
        I: Interrupt<E> + 'static,
    {
        self.interrupts.push(Arc::new(interrupt));
        self
    }

    /// Report delegation on a stopped stage as [`FlowError::Stopped`](crate::FlowError::Stopped)
    /// instead of returning `Ok(())` without doing anything.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl<E: FlowEvent> Default for Options<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Options<E> {
    fn clone(&self) -> Self {
        Self {
            interrupts: self.interrupts.clone(),
            on_event_ended: self.on_event_ended.clone(),
            strict: self.strict,
        }
    }
}

impl<E> fmt::Debug for Options<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("interrupts", &self.interrupts.len())
            .field("on_event_ended", &self.on_event_ended.is_some())
            .field("strict", &self.strict)
            .finish()
    }
}

/// `first` then `second`; either may be absent.
pub(crate) fn compose<E: 'static>(first: Option<Hook<E>>, second: Option<Hook<E>>) -> Option<Hook<E>> {
    match (first, second) {
        (None, hook) | (hook, None) => hook,
        (Some(first), Some(second)) => Some(Arc::new(move |event: &E| {
            first(event);
            second(event);
        })),
    }
}
