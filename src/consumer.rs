//! The pull-based record iterator over the bounded event queue.
//!
//! The iterator keeps pulling while the engine is running or events remain
//! queued. It uses asymmetric wait windows: a long one before the first
//! record (engine startup and the snapshot scan can be slow without being
//! stalled) and a shorter one afterwards. A window elapsing empty is treated
//! as a stall and requests shutdown, but never discards queued events: the
//! engine may still be finishing work before it acknowledges the stop.

use crate::{
    config::PollingConfig,
    event::ChangeEvent,
    producer::EngineRunner,
    queue::EventRx,
    shutdown::ShutdownCoordinator,
    target::TargetPosition,
    Error, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A pull source of change events. The sequence is finite and not
/// restartable; after the first `Ok(None)` it only returns `Ok(None)`.
#[async_trait]
pub trait RecordSource: Send {
    async fn next_record(&mut self) -> Result<Option<ChangeEvent>>;
}

pub struct RecordIterator {
    queue: EventRx,
    runner: EngineRunner,
    shutdown: ShutdownCoordinator,
    target: Arc<dyn TargetPosition>,
    first_wait: Duration,
    subsequent_wait: Duration,
    received_first_record: bool,
    has_snapshot_finished: bool,
    signalled_close: bool,
    done: bool,
}

impl RecordIterator {
    pub fn new(
        queue: EventRx,
        runner: EngineRunner,
        shutdown: ShutdownCoordinator,
        target: Arc<dyn TargetPosition>,
        polling: &PollingConfig,
    ) -> Self {
        Self {
            queue,
            runner,
            shutdown,
            target,
            first_wait: polling.first_record_wait(),
            subsequent_wait: polling.subsequent_record_wait(),
            received_first_record: false,
            has_snapshot_finished: true,
            signalled_close: false,
            done: false,
        }
    }

    /// Pulls the next event, or ends the sequence once the engine has
    /// stopped and the queue is empty.
    pub async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        if self.done {
            return Ok(None);
        }

        while !(self.runner.has_stopped() && self.queue.is_empty()) {
            let wait = if self.received_first_record {
                self.subsequent_wait
            } else {
                self.first_wait
            };

            match self.queue.poll(wait).await {
                None => {
                    // Stall: ask the engine to stop, then keep looping so
                    // already-enqueued events are still yielded.
                    debug!("no event within {:?}, requesting engine shutdown", wait);
                    self.request_close().await?;
                }
                Some(event) => {
                    // Re-derived from the last observed event, not latched:
                    // a late snapshot-phase event flips this back to false.
                    self.has_snapshot_finished = event.snapshot_metadata().snapshot_finished();

                    if !self.signalled_close && self.target.reached(&event) {
                        info!("target position reached, requesting engine shutdown");
                        self.request_close().await?;
                    }
                    self.received_first_record = true;
                    return Ok(Some(event));
                }
            }
        }

        self.done = true;
        // Tear down even when shutdown was never signalled (the engine ended
        // on its own); this also surfaces any terminal engine error.
        self.runner.close().await?;
        Ok(None)
    }

    /// Requests engine shutdown via the coordinator. Idempotent.
    ///
    /// Raises [`Error::PrematureShutdown`] if close resolves while the
    /// snapshot phase is still unfinished.
    pub async fn request_close(&mut self) -> Result<()> {
        if self.signalled_close {
            return Ok(());
        }
        self.signalled_close = true;
        self.shutdown.initiate(&mut self.runner).await?;
        if !self.has_snapshot_finished {
            return Err(Error::PrematureShutdown);
        }
        Ok(())
    }

    pub fn has_snapshot_finished(&self) -> bool {
        self.has_snapshot_finished
    }

    pub fn close_signalled(&self) -> bool {
        self.signalled_close
    }

    pub fn has_closed(&self) -> bool {
        self.runner.has_closed()
    }

    /// Events moved to the overflow queue during shutdown, in original order.
    pub fn records_remaining_after_shutdown(&self) -> Vec<ChangeEvent> {
        self.shutdown.records_remaining_after_shutdown()
    }
}

#[async_trait]
impl RecordSource for RecordIterator {
    async fn next_record(&mut self) -> Result<Option<ChangeEvent>> {
        self.next().await
    }
}
