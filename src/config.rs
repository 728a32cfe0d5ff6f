use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Fixed capacity of the bounded event queue.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// How long a single enqueue attempt waits before retrying on a full
    /// queue. The producer retries forever rather than drop an event.
    #[serde(default = "default_enqueue_wait_ms")]
    pub enqueue_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Wait window before the first record has been seen. Long, because
    /// engine startup and the initial snapshot scan can take minutes.
    #[serde(default = "default_first_record_wait_secs")]
    pub first_record_wait_secs: u64,
    /// Wait window once records are flowing. A miss here is treated as a
    /// stall and triggers a shutdown request.
    #[serde(default = "default_subsequent_record_wait_secs")]
    pub subsequent_record_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    /// Records between checkpoint attempts. Zero disables periodic
    /// checkpointing (the final checkpoint is still always emitted).
    #[serde(default = "default_checkpoint_records")]
    pub max_records: u64,
    /// Elapsed time between checkpoint attempts.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub max_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Ceiling on waiting for the engine's one-time completion callback.
    #[serde(default = "default_engine_close_timeout_secs")]
    pub engine_close_timeout_secs: u64,
    /// Ceiling on joining the shutdown drain task.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Poll interval used by the drain task while moving events.
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(Error::Config("queue.capacity must be at least 1".into()));
        }
        if self.queue.enqueue_wait_ms == 0 {
            return Err(Error::Config("queue.enqueue_wait_ms must be non-zero".into()));
        }
        if self.polling.first_record_wait_secs == 0 || self.polling.subsequent_record_wait_secs == 0
        {
            return Err(Error::Config("polling wait windows must be non-zero".into()));
        }
        if self.shutdown.engine_close_timeout_secs == 0 || self.shutdown.drain_timeout_secs == 0 {
            return Err(Error::Config("shutdown timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }
}

impl PollingConfig {
    pub fn first_record_wait(&self) -> Duration {
        Duration::from_secs(self.first_record_wait_secs)
    }

    pub fn subsequent_record_wait(&self) -> Duration {
        Duration::from_secs(self.subsequent_record_wait_secs)
    }
}

impl CheckpointConfig {
    /// Periodic checkpointing is off when the record threshold is zero.
    pub fn enabled(&self) -> bool {
        self.max_records > 0
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn disabled() -> Self {
        Self {
            max_records: 0,
            max_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn engine_close_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_close_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            polling: PollingConfig::default(),
            checkpoint: CheckpointConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            enqueue_wait_ms: default_enqueue_wait_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            first_record_wait_secs: default_first_record_wait_secs(),
            subsequent_record_wait_secs: default_subsequent_record_wait_secs(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_records: default_checkpoint_records(),
            max_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            engine_close_timeout_secs: default_engine_close_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            drain_poll_ms: default_drain_poll_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_enqueue_wait_ms() -> u64 {
    5_000
}

fn default_first_record_wait_secs() -> u64 {
    300
}

fn default_subsequent_record_wait_secs() -> u64 {
    60
}

fn default_checkpoint_records() -> u64 {
    10_000
}

fn default_checkpoint_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_engine_close_timeout_secs() -> u64 {
    300
}

fn default_drain_timeout_secs() -> u64 {
    120
}

fn default_drain_poll_ms() -> u64 {
    100
}
