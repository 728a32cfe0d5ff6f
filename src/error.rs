//! Error types and result handling for cdc-bridge.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Most errors are fatal to the current sync attempt. The one deliberate
//! exception is [`Error::OffsetReadRace`]: the offset store may be mid-write
//! when the checkpoint decorator tries to read it, and that read is simply
//! retried on the next cycle. Callers can distinguish it via
//! [`Error::is_retryable`].

use thiserror::Error;

/// The main error type for cdc-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, raised fast at construction rather than deferred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external engine reported a non-recoverable error at stop.
    #[error("Engine terminal failure: {0}")]
    EngineFatal(String),

    /// The engine was shut down before the snapshot phase completed.
    ///
    /// Resuming from an incomplete snapshot would skip rows, so this is
    /// always fatal and never swallowed.
    #[error("Engine shut down before the initial snapshot completed")]
    PrematureShutdown,

    /// The offset store was observed mid-write. Retryable: skip this
    /// checkpoint attempt and read again on the next cycle.
    #[error("Offset store busy: {0}")]
    OffsetReadRace(String),

    /// The shutdown drain task failed.
    #[error("Shutdown drain failed: {0}")]
    Drain(String),

    /// Both the engine close and the drain task failed during shutdown.
    /// The drain failure is attached as secondary rather than discarded.
    #[error("Engine close failed ({close}); drain also failed ({drain})")]
    CloseAndDrain {
        /// The primary close failure
        close: Box<Error>,
        /// The secondary drain failure
        drain: Box<Error>,
    },

    /// JSON serialization error when encoding offsets or events.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from offset or schema-history file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded wait elapsed without the awaited condition.
    #[error("Timeout: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// The event queue was closed while an operation was in flight.
    #[error("Event queue closed")]
    QueueClosed,
}

impl Error {
    /// Whether the failed operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::OffsetReadRace(_))
    }
}

/// A convenient Result type alias for cdc-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
