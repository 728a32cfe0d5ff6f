//! Top-level wiring of the four core components.
//!
//! `CdcPipeline` builds the bounded queue, launches the engine runner, and
//! stacks the shutdown coordinator, record iterator and checkpoint decorator
//! on top. One pipeline instance serves one sync attempt: one producer, one
//! consumer, one shutdown coordinator. There is no resume on the same
//! instance; a new attempt constructs a fresh pipeline from persisted state.

use crate::{
    checkpoint::{CheckpointingIterator, PipelineMessage},
    config::BridgeConfig,
    consumer::RecordIterator,
    engine::{ChangeEngine, EventSink},
    event::ChangeEvent,
    producer::EngineRunner,
    queue,
    shutdown::ShutdownCoordinator,
    store::{OffsetStore, SchemaHistoryStore},
    target::TargetPosition,
    Result,
};
use std::sync::Arc;
use tracing::info;

pub struct CdcPipeline {
    inner: CheckpointingIterator<RecordIterator>,
}

impl CdcPipeline {
    /// Validates the config, starts the engine, and assembles the
    /// checkpointed stream.
    pub async fn start(
        engine: Box<dyn ChangeEngine>,
        offset_store: Arc<dyn OffsetStore>,
        history_store: Option<Arc<dyn SchemaHistoryStore>>,
        track_schema_history: bool,
        target: Arc<dyn TargetPosition>,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            queue_capacity = config.queue.capacity,
            checkpoint_records = config.checkpoint.max_records,
            "starting CDC pipeline"
        );

        let (tx, rx) = queue::bounded(config.queue.capacity);
        let sink = EventSink::new(tx, config.queue.enqueue_wait());
        let runner = EngineRunner::start(engine, sink, config.shutdown.engine_close_timeout());
        let shutdown = ShutdownCoordinator::new(rx.clone(), &config.shutdown);
        let consumer = RecordIterator::new(rx, runner, shutdown, Arc::clone(&target), &config.polling);
        let inner = CheckpointingIterator::new(
            consumer,
            offset_store,
            history_store,
            track_schema_history,
            target,
            config.checkpoint,
        )
        .await?;

        Ok(Self { inner })
    }

    /// Pulls the next output message; `Ok(None)` ends the (finite,
    /// non-restartable) sequence.
    pub async fn next_message(&mut self) -> Result<Option<PipelineMessage>> {
        self.inner.next_message().await
    }

    /// Events moved aside during shutdown, in original order.
    pub fn records_remaining_after_shutdown(&self) -> Vec<ChangeEvent> {
        self.inner.source().records_remaining_after_shutdown()
    }

    pub fn has_closed(&self) -> bool {
        self.inner.source().has_closed()
    }
}
