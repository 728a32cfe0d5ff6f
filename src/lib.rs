//! Streaming ingestion and checkpoint core for a CDC connector.
//!
//! Bridges a continuously-running, push-driven change-capture engine to a
//! pull-based, checkpointed consumer: the engine pushes events into a
//! bounded queue on its own schedule, a record iterator pulls on demand with
//! adaptive timeouts, a shutdown coordinator drains the queue into an
//! overflow queue at close time to avoid deadlock, and a checkpoint
//! decorator interleaves durable offsets into the output stream, never
//! ahead of the records already yielded.

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod target;

pub use checkpoint::{Checkpoint, CheckpointingIterator, PipelineMessage};
pub use config::{BridgeConfig, CheckpointConfig, PollingConfig, QueueConfig, ShutdownConfig};
pub use consumer::{RecordIterator, RecordSource};
pub use engine::{ChangeEngine, EngineCompletion, EventSink, StopSignal};
pub use error::{Error, Result};
pub use event::{ChangeEvent, SnapshotMetadata};
pub use pipeline::CdcPipeline;
pub use producer::EngineRunner;
pub use shutdown::ShutdownCoordinator;
pub use store::{
    FileOffsetStore, FileSchemaHistoryStore, Offset, OffsetStore, SchemaHistory,
    SchemaHistoryStore,
};
pub use target::{NeverReached, TargetPosition};
