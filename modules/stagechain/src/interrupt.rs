//! Pre-forwarding hooks run on a relay task.

use std::fmt;
use std::marker::PhantomData;

/// What an interrupt asked the relay to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancel {
    /// Stop the child this relay feeds, with its whole subtree.
    Stage,
    /// Stop only the child's current delegation (the grandchild subtree) and
    /// keep the child running.
    Next,
}

/// Stop capability handed to an [`Interrupt`].
///
/// Either request swallows the event that triggered it: it is never
/// forwarded. [`Cancel::Stage`] wins over [`Cancel::Next`].
#[derive(Debug, Default)]
pub struct Control {
    request: Option<Cancel>,
}

impl Control {
    pub fn stop(&mut self) {
        self.request = Some(Cancel::Stage);
    }

    pub fn stop_next(&mut self) {
        if self.request.is_none() {
            self.request = Some(Cancel::Next);
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.request.is_some()
    }

    pub fn request(&self) -> Option<Cancel> {
        self.request
    }

    pub(crate) fn take(&mut self) -> Option<Cancel> {
        self.request.take()
    }
}

/// Inspects each event on a relay before it is forwarded to the child.
///
/// Runs synchronously on the relay task. The requested cancellation is carried
/// out by the relay right after `inspect` returns, before the next interrupt runs.
pub trait Interrupt<E>: Send + Sync {
    fn inspect(&self, event: &E, control: &mut Control);
}

impl<E, F> Interrupt<E> for F
where
    F: Fn(&E, &mut Control) + Send + Sync,
{
    fn inspect(&self, event: &E, control: &mut Control) {
        self(event, control)
    }
}

/// Stops the child when `predicate` matches.
pub fn stop_when<E, P>(predicate: P) -> StopWhen<E, P>
where
    P: Fn(&E) -> bool + Send + Sync,
{
    StopWhen {
        predicate,
        cancel: Cancel::Stage,
        _event: PhantomData,
    }
}

/// Stops the child's current delegation when `predicate` matches.
pub fn stop_next_when<E, P>(predicate: P) -> StopWhen<E, P>
where
    P: Fn(&E) -> bool + Send + Sync,
{
    StopWhen {
        predicate,
        cancel: Cancel::Next,
        _event: PhantomData,
    }
}

pub struct StopWhen<E, P> {
    predicate: P,
    cancel: Cancel,
    _event: PhantomData<fn(&E)>,
}

impl<E, P> Interrupt<E> for StopWhen<E, P>
where
    P: Fn(&E) -> bool + Send + Sync,
{
    fn inspect(&self, event: &E, control: &mut Control) {
        if (self.predicate)(event) {
            match self.cancel {
                Cancel::Stage => control.stop(),
                Cancel::Next => control.stop_next(),
            }
        }
    }
}

impl<E, P> fmt::Debug for StopWhen<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopWhen")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_request_wins_over_next() {
        let mut control = Control::default();
        control.stop_next();
        control.stop();
        control.stop_next();
        assert_eq!(control.request(), Some(Cancel::Stage));
    }

    #[test]
    fn predicate_interrupts_only_on_match() {
        let quit = stop_when(|c: &char| *c == 'q');
        let back = stop_next_when(|c: &char| *c == '<');

        let mut control = Control::default();
        quit.inspect(&'a', &mut control);
        back.inspect(&'a', &mut control);
        assert!(!control.is_stopping());

        back.inspect(&'<', &mut control);
        assert_eq!(control.take(), Some(Cancel::Next));
        quit.inspect(&'q', &mut control);
        assert_eq!(control.take(), Some(Cancel::Stage));
        assert!(!control.is_stopping(), "take clears the request");
    }
}
