//! # Directory Watcher
//!
//! This crate provides the event source for the watchdir dispatcher: it
//! loads the watch configuration, compiles filename patterns and subscribes
//! to file creation events in a single directory.
//!
//! ## Features
//!
//! - **Validated Configuration**: YAML config with defaults and distinguishable errors
//! - **Filename Patterns**: Shell-glob matching on base names
//! - **Subscriptions**: Non-recursive `notify` watches exposed as async streams
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ConfigLoader ──► WatchConfig ──► PatternSet                   │
//! │                        │                                        │
//! │                        ▼                                        │
//! │  EventSubscriber ──► Subscription ──► FileEvent                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod patterns;
pub mod watcher;

pub use config::{ConfigLoader, DEFAULT_CONFIG_PATH, PROCESSOR_TARGET_ENV, WatchConfig};
pub use error::{Result, WatcherError};
pub use event::{FileAttributes, FileEvent, FileEventKind};
pub use patterns::PatternSet;
pub use watcher::{EventSubscriber, NotifySubscriber, Subscription};
