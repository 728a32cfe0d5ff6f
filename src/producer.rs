//! The engine runner: drives the external engine on its own task.
//!
//! The runner owns the spawned engine task and the stop/stopped signalling
//! around it. `close()` is idempotent and safe to call while the engine is
//! running: it requests stop, waits (bounded) for the one-time completion
//! report, tears the task down, and rethrows a terminal engine error if the
//! completion carried one. `has_closed()` is true only after full teardown.

use crate::{
    engine::{ChangeEngine, EngineCompletion, EventSink, StopSignal},
    Error, Result,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

pub struct EngineRunner {
    stop_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
    completion: Arc<Mutex<Option<EngineCompletion>>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
    close_timeout: Duration,
}

impl EngineRunner {
    /// Launches the engine on a dedicated task. Accepted events flow into
    /// `sink`'s queue; the engine's sender side is dropped when the run ends,
    /// which closes the queue once it drains.
    pub fn start(
        mut engine: Box<dyn ChangeEngine>,
        sink: EventSink,
        close_timeout: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let completion = Arc::new(Mutex::new(None));
        let completion_slot = Arc::clone(&completion);

        let task = tokio::spawn(async move {
            info!("capture engine starting");
            let result = engine.run(sink, StopSignal::new(stop_rx)).await;
            let report = EngineCompletion::from_result(&result);
            if report.success {
                info!("capture engine stopped");
            } else {
                error!("capture engine terminated with error: {}", report.message);
            }
            if let Ok(mut slot) = completion_slot.lock() {
                *slot = Some(report);
            }
            let _ = stopped_tx.send(true);
        });

        Self {
            stop_tx,
            stopped_rx,
            completion,
            task: Some(task),
            closed: false,
            close_timeout,
        }
    }

    /// Whether the engine is no longer producing (its run has ended).
    pub fn has_stopped(&self) -> bool {
        *self.stopped_rx.borrow()
    }

    /// A watch on the stopped flag, for the shutdown drain task.
    pub fn stopped_signal(&self) -> watch::Receiver<bool> {
        self.stopped_rx.clone()
    }

    /// True only after `close()` has fully torn the engine task down.
    pub fn has_closed(&self) -> bool {
        self.closed
    }

    /// Requests engine stop and waits for full termination. Idempotent.
    ///
    /// A terminal error reported by the engine at completion is rethrown
    /// here; it is never silently dropped.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let _ = self.stop_tx.send(true);

        let mut stopped = self.stopped_rx.clone();
        // Collapse to a bool so the watch ref is not held across later
        // awaits; the future must stay Send.
        let acknowledged = timeout(self.close_timeout, stopped.wait_for(|s| *s))
            .await
            .is_ok();
        if !acknowledged {
            warn!(
                "engine did not acknowledge stop within {:?}",
                self.close_timeout
            );
            return Err(Error::Timeout {
                message: format!(
                    "engine did not complete within {:?} of close request",
                    self.close_timeout
                ),
            });
        }

        if let Some(task) = self.task.take() {
            match timeout(self.close_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    self.closed = true;
                    return Err(Error::EngineFatal(format!(
                        "engine task failed: {join_err}"
                    )));
                }
                Err(_) => {
                    return Err(Error::Timeout {
                        message: "engine task did not terminate".to_string(),
                    });
                }
            }
        }
        self.closed = true;
        info!("capture engine torn down");

        let completion = self
            .completion
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        match completion {
            Some(report) if !report.success => Err(Error::EngineFatal(report.message)),
            _ => Ok(()),
        }
    }
}
