//! Error types for the dispatcher.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced by the dispatcher, its lifecycle and its event source.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Directory watcher or configuration error.
    #[error("watcher error: {0}")]
    Watcher(#[from] watchdir_directory_watcher::WatcherError),

    /// Gate capacity must be positive.
    #[error("invalid concurrency cap: {0}")]
    InvalidCapacity(usize),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Notify error from the configuration file watch.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// The control channel closed before a request could be delivered.
    #[error("control channel closed")]
    ControlClosed,
}

/// Errors reported by a [`Processor`](crate::processor::Processor).
///
/// These never escape the job that produced them.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The file could not be read or inspected.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The processor exceeded its own wall-clock budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Any other processing failure.
    #[error("processing failed: {0}")]
    Failed(String),
}
