//! Error types for the directory watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Watched path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration was parsed but failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Processor target is not a usable URL.
    #[error("invalid processor target {target:?}: {reason}")]
    InvalidTarget {
        /// The rejected value.
        target: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscription's event channel closed underneath the consumer.
    #[error("subscription closed for {0}")]
    SubscriptionClosed(PathBuf),
}

impl WatcherError {
    /// Whether this error came from configuration loading or validation.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Config(_) | Self::InvalidTarget { .. }
        )
    }
}
