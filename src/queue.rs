//! The bounded event queue shared by producer, consumer and shutdown drain.
//!
//! This is the sole synchronization point between the engine-driven producer
//! and the pull-driven consumer. The send side blocks with a bounded wait and
//! retries on a full queue, so backpressure never drops an event. The receive
//! side is clone-able: during shutdown the drain task and the consumer both
//! pull from the same queue, each observing a FIFO subsequence.

use crate::{event::ChangeEvent, Error, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::trace;

/// Creates a fixed-capacity FIFO queue of change events.
pub fn bounded(capacity: usize) -> (EventTx, EventRx) {
    let (tx, rx) = async_channel::bounded(capacity);
    (EventTx { tx }, EventRx { rx })
}

/// Send side of the bounded event queue.
#[derive(Clone)]
pub struct EventTx {
    tx: async_channel::Sender<ChangeEvent>,
}

impl EventTx {
    /// Enqueues an event, waiting `wait` per attempt and retrying until the
    /// queue accepts it. Returns an error only if the receive side is gone.
    pub async fn push(&self, event: ChangeEvent, wait: Duration) -> Result<()> {
        loop {
            match timeout(wait, self.tx.send(event.clone())).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(_)) => return Err(Error::QueueClosed),
                Err(_) => {
                    trace!("event queue full, retrying enqueue");
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}

/// Receive side of the bounded event queue.
#[derive(Clone)]
pub struct EventRx {
    rx: async_channel::Receiver<ChangeEvent>,
}

impl EventRx {
    /// Waits up to `wait` for the next event. `None` means the window elapsed
    /// empty, or the send side is closed and the queue fully drained.
    pub async fn poll(&self, wait: Duration) -> Option<ChangeEvent> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Ok(event)) => Some(event),
            Ok(Err(_)) => None,
            Err(_) => None,
        }
    }

    /// Non-blocking poll.
    pub fn try_poll(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
