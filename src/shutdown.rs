//! Close-time coordination between producer and consumer.
//!
//! A synchronous close can deadlock: if the bounded queue is full, the
//! producer blocks on enqueue, and the consumer that would normally drain it
//! is itself blocked requesting the close. The coordinator breaks the cycle
//! by draining the bounded queue into an unbounded overflow queue on a
//! background task started *before* the producer is asked to close, then
//! joining that task deterministically.

use crate::{
    config::ShutdownConfig, event::ChangeEvent, producer::EngineRunner, queue::EventRx, Error,
    Result,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct ShutdownCoordinator {
    source: EventRx,
    overflow_tx: async_channel::Sender<ChangeEvent>,
    overflow_rx: async_channel::Receiver<ChangeEvent>,
    drain_poll: Duration,
    drain_timeout: Duration,
    drain_finished: bool,
    completed: bool,
}

impl ShutdownCoordinator {
    pub fn new(source: EventRx, config: &ShutdownConfig) -> Self {
        let (overflow_tx, overflow_rx) = async_channel::unbounded();
        Self {
            source,
            overflow_tx,
            overflow_rx,
            drain_poll: config.drain_poll(),
            drain_timeout: config.drain_timeout(),
            drain_finished: false,
            completed: false,
        }
    }

    /// Runs the shutdown sequence at most once.
    ///
    /// No-op when the producer already reports stopped (nothing can block on
    /// the queue any more; the consumer drains the remainder normally).
    /// Otherwise the drain task is spawned first, then the producer is asked
    /// to close, and the drain task is always joined regardless of the close
    /// outcome. If both fail, the drain error is attached as secondary.
    pub async fn initiate(&mut self, runner: &mut EngineRunner) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        if runner.has_stopped() {
            info!("engine already stopped, skipping shutdown drain");
            self.completed = true;
            self.drain_finished = true;
            return Ok(());
        }

        let mut drain = tokio::spawn(drain_queue(
            self.source.clone(),
            self.overflow_tx.clone(),
            runner.stopped_signal(),
            self.drain_poll,
        ));

        let close_result = runner.close().await;

        let drain_result = match timeout(self.drain_timeout, &mut drain).await {
            Ok(Ok(Ok(moved))) => {
                debug!(moved, "shutdown drain finished");
                self.drain_finished = true;
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => Err(Error::Drain(format!("drain task failed: {join_err}"))),
            Err(_) => {
                // Stop the drain task; it must not keep moving events after
                // the shutdown sequence has concluded.
                drain.abort();
                Err(Error::Timeout {
                    message: format!("drain task did not finish within {:?}", self.drain_timeout),
                })
            }
        };

        self.completed = true;
        match (close_result, drain_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(close), Ok(())) => Err(close),
            (Ok(()), Err(drain)) => Err(drain),
            (Err(close), Err(drain)) => Err(Error::CloseAndDrain {
                close: Box::new(close),
                drain: Box::new(drain),
            }),
        }
    }

    pub fn has_completed(&self) -> bool {
        self.completed
    }

    /// The not-yet-consumed tail moved aside during shutdown, in original
    /// order. Calling this before the drain is confirmed finished may miss
    /// events still in flight.
    pub fn records_remaining_after_shutdown(&self) -> Vec<ChangeEvent> {
        if !self.drain_finished {
            warn!("overflow queue accessed before the shutdown drain finished");
        }
        let mut remaining = Vec::with_capacity(self.overflow_rx.len());
        while let Ok(event) = self.overflow_rx.try_recv() {
            remaining.push(event);
        }
        remaining
    }
}

/// Moves events from the bounded source queue to the overflow queue until the
/// engine has stopped and the source is observed empty.
async fn drain_queue(
    source: EventRx,
    overflow: async_channel::Sender<ChangeEvent>,
    stopped: watch::Receiver<bool>,
    poll: Duration,
) -> Result<u64> {
    let mut moved = 0u64;
    loop {
        if *stopped.borrow() && source.is_empty() {
            return Ok(moved);
        }
        if let Some(event) = source.poll(poll).await {
            overflow
                .send(event)
                .await
                .map_err(|_| Error::Drain("overflow queue closed".to_string()))?;
            moved += 1;
        }
    }
}
