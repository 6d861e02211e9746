//! # Dispatcher
//!
//! Turns file creation events from a watched directory into processing jobs
//! while never running more than the configured number at once.
//!
//! ## Features
//!
//! - **Admission Gate**: Versioned, resizable concurrency limit
//! - **Pending Queue**: Bounded FIFO overflow with load shedding when full
//! - **Supervised Source**: Resubscribes after watcher failures
//! - **Live Reload**: SIGHUP or a config file edit reapplies the configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Dispatcher                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  EventSource ──► Dispatcher ──► Gate ──► Job ──► Processor       │
//! │                   │                                              │
//! │                   ▼                                              │
//! │              PendingQueue ◄── drainer                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  signals / config file ──► Control ──► Lifecycle ──► ConfigStore │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod job;
pub mod lifecycle;
pub mod processor;
pub mod queue;
pub mod source;
pub mod store;

pub use dispatcher::{DispatchOutcome, DispatchStats, Dispatcher, IgnoreReason, ShutdownReport};
pub use error::{DispatchError, ProcessorError, Result};
pub use gate::{AdmissionGate, AdmissionPermit, GateGeneration};
pub use job::{Job, JobOutcome, JobState};
pub use lifecycle::{
    CONFIG_SETTLE, CONTROL_BUFFER, ConfigFileWatch, Control, DEFAULT_SHUTDOWN_GRACE, Lifecycle, ReloadReport,
    ReloadSource, spawn_signal_listener,
};
pub use processor::{DEFAULT_PROCESS_TIMEOUT, DelayProcessor, ProcessReport, Processor};
pub use queue::{DEFAULT_QUEUE_CAPACITY, PendingQueue};
pub use source::{DEFAULT_RESTART_BACKOFF, EventSource, SourceReport};
pub use store::{ConfigSnapshot, ConfigStore};
