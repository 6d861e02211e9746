//! Shared, atomically replaceable configuration.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::debug;
use watchdir_directory_watcher::{PatternSet, WatchConfig};

/// An immutable configuration snapshot with its compiled patterns.
#[derive(Debug)]
pub struct ConfigSnapshot {
    /// Validated configuration.
    pub config: WatchConfig,

    /// Patterns compiled from `config.file_patterns`.
    pub patterns: PatternSet,

    /// Increases by one on every replacement.
    pub generation: u64,
}

/// Holds the current [`ConfigSnapshot`].
///
/// Readers always receive a complete snapshot; replacement swaps the whole
/// `Arc` under the write lock.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
    changes: watch::Sender<u64>,
}

impl ConfigStore {
    /// Create a store holding `config` as generation 0.
    pub fn new(config: WatchConfig) -> Self {
        let snapshot = ConfigSnapshot {
            patterns: PatternSet::new(&config.file_patterns),
            config,
            generation: 0,
        };
        let (changes, _) = watch::channel(0);

        Self {
            current: RwLock::new(Arc::new(snapshot)),
            changes,
        }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install `config` as the new snapshot and return both old and new.
    pub fn replace(&self, config: WatchConfig) -> (Arc<ConfigSnapshot>, Arc<ConfigSnapshot>) {
        let patterns = PatternSet::new(&config.file_patterns);

        let (previous, next) = {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            let next = Arc::new(ConfigSnapshot {
                config,
                patterns,
                generation: guard.generation + 1,
            });
            let previous = std::mem::replace(&mut *guard, Arc::clone(&next));
            (previous, next)
        };

        debug!(
            "Configuration replaced: generation {} -> {}",
            previous.generation, next.generation
        );
        self.changes.send_replace(next.generation);
        (previous, next)
    }

    /// Receiver notified with the generation number after each replacement.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
