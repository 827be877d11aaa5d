//! Single-slot stage buffer.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// Outcome of handing an event to a buffer.
#[derive(Debug)]
pub(crate) enum Push<E> {
    Delivered,
    /// The buffer was closed; the event comes back to the caller.
    Closed(E),
}

/// Capacity-one event slot with a one-way open → closed transition.
///
/// Closing drops the stored sender, so the reader still drains whatever was
/// accepted before the close and then sees the end of the stream.
pub(crate) struct Buffer<E> {
    sender: Mutex<Option<mpsc::Sender<E>>>,
    receiver: AsyncMutex<mpsc::Receiver<E>>,
    closed: CancellationToken,
}

impl<E> Buffer<E> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: AsyncMutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the buffer is closed.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Close the buffer. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut sender = self.sender.lock();
        if sender.take().is_none() {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Wait for room and enqueue `event`.
    ///
    /// The open check and the enqueue happen under the lock that `close` takes,
    /// so an event is either accepted before the close or returned.
    pub(crate) async fn push(&self, event: E) -> Push<E> {
        let Some(sender) = self.sender.lock().clone() else {
            return Push::Closed(event);
        };
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            permit = sender.reserve() => permit.ok(),
        };
        let Some(permit) = permit else {
            return Push::Closed(event);
        };

        let open = self.sender.lock();
        if open.is_none() {
            return Push::Closed(event);
        }
        permit.send(event);
        Push::Delivered
    }

    /// Next buffered event, or `None` once the buffer is closed and drained.
    pub(crate) async fn pull(&self) -> Option<E> {
        self.receiver.lock().await.recv().await
    }

    /// Take everything still buffered without waiting for more.
    ///
    /// Synchronous so it can run from a drop guard. Returns nothing while a
    /// reader is parked in [`pull`](Self::pull).
    pub(crate) fn drain(&self) -> Vec<E> {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            return Vec::new();
        };
        let mut left = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            left.push(event);
        }
        left
    }
}

impl<E> fmt::Debug for Buffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_blocks_while_slot_is_full() {
        let buffer = Arc::new(Buffer::new());
        assert!(matches!(buffer.push(1).await, Push::Delivered));

        let second = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished(), "capacity is exactly one");

        assert_eq!(buffer.pull().await, Some(1));
        let pushed = second.await.expect("task should not panic");
        assert!(matches!(pushed, Push::Delivered));
        assert_eq!(buffer.pull().await, Some(2));
    }

    #[tokio::test]
    async fn close_releases_blocked_pusher() {
        let buffer = Arc::new(Buffer::new());
        assert!(matches!(buffer.push("kept").await, Push::Delivered));

        let blocked = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push("rejected").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(buffer.close());

        let pushed = blocked.await.expect("task should not panic");
        assert!(matches!(pushed, Push::Closed("rejected")));

        // Accepted before the close: still delivered, then end of stream.
        assert_eq!(buffer.pull().await, Some("kept"));
        assert_eq!(buffer.pull().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let buffer: Buffer<u8> = Buffer::new();
        assert!(buffer.close());
        assert!(!buffer.close());
        assert!(buffer.is_closed());
        assert!(matches!(buffer.push(1).await, Push::Closed(1)));
    }

    #[tokio::test]
    async fn drain_takes_leftovers() {
        let buffer = Buffer::new();
        assert!(matches!(buffer.push('x').await, Push::Delivered));
        buffer.close();
        assert_eq!(buffer.drain(), vec!['x']);
        assert!(buffer.drain().is_empty());
    }
}
