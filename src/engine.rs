//! The external change-capture engine port.
//!
//! A [`ChangeEngine`] is the push-driven collaborator: once started it
//! delivers raw (key, value) pairs on its own schedule until asked to stop.
//! The core never depends on a concrete engine; connectors implement this
//! trait around their capture machinery.

use crate::{event::ChangeEvent, queue::EventTx, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// A push-driven capture engine.
///
/// `run` is invoked once, on a dedicated task, and must not return until the
/// engine has fully stopped: either its source is exhausted, `stop` fires, or
/// a terminal failure occurs. Events are handed to `sink`; a returned error
/// is the engine's one-time terminal report and is rethrown by the producer's
/// `close()`.
#[async_trait]
pub trait ChangeEngine: Send + 'static {
    async fn run(&mut self, sink: EventSink, stop: StopSignal) -> Result<()>;
}

/// Engine-facing surface of the bounded event queue.
///
/// Filters tombstones (null values) before they reach the queue and applies
/// the blocking-retry enqueue so backpressure never drops data.
pub struct EventSink {
    queue: EventTx,
    enqueue_wait: Duration,
}

impl EventSink {
    pub(crate) fn new(queue: EventTx, enqueue_wait: Duration) -> Self {
        Self { queue, enqueue_wait }
    }

    /// Delivers one raw engine callback. A missing value marks a change-log
    /// artifact with nothing to replicate and is discarded here.
    pub async fn deliver(&self, key: Option<Value>, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => {
                self.queue
                    .push(ChangeEvent::new(key, value), self.enqueue_wait)
                    .await
            }
            None => {
                trace!("discarding tombstone event");
                Ok(())
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Completion report captured exactly once when the engine's run ends.
#[derive(Debug, Clone)]
pub struct EngineCompletion {
    pub success: bool,
    pub message: String,
}

impl EngineCompletion {
    pub(crate) fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                message: "engine stopped".to_string(),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// Cooperative stop signal observed by a running engine.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop has been requested.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            // Producer gone entirely; treat as a stop request.
            debug!("stop channel dropped, treating as stop request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use serde_json::json;

    #[tokio::test]
    async fn sink_filters_tombstones() {
        let (tx, rx) = queue::bounded(4);
        let sink = EventSink::new(tx, Duration::from_millis(10));

        sink.deliver(Some(json!(1)), None).await.unwrap();
        sink.deliver(Some(json!(2)), Some(json!({"after": {"id": 2}})))
            .await
            .unwrap();

        let only = rx.poll(Duration::from_millis(20)).await.unwrap();
        assert_eq!(only.key, Some(json!(2)));
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn stop_signal_observes_request() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let mut signal = StopSignal::new(rx);
        assert!(!signal.is_requested());

        tx.send(true).unwrap();
        signal.requested().await;
        assert!(signal.is_requested());
    }
}
