//! Directory subscriptions backed by `notify`.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::{Result, WatcherError};
use crate::event::{FileEvent, FileEventKind};

/// Buffered events per subscription before the notify thread applies backpressure.
pub const EVENT_BUFFER: usize = 1000;

/// Opens subscriptions to directory-level file events.
pub trait EventSubscriber: Send + Sync {
    /// Start watching `path` and return the stream of its events.
    fn subscribe(&self, path: &Path) -> Result<Subscription>;
}

/// A live stream of events for one directory.
///
/// An `Err` item means the whole subscription failed and should be replaced;
/// `None` means the producer went away.
pub struct Subscription {
    /// Watched directory.
    path: PathBuf,

    /// Incoming events.
    events: mpsc::Receiver<Result<FileEvent>>,

    /// Keeps the underlying watcher alive for as long as the subscription.
    native: Option<RecommendedWatcher>,
}

impl Subscription {
    /// Create a subscription fed by a plain channel.
    pub fn channel(
        path: impl Into<PathBuf>,
        buffer: usize,
    ) -> (mpsc::Sender<Result<FileEvent>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let subscription = Self {
            path: path.into(),
            events: rx,
            native: None,
        };
        (tx, subscription)
    }

    /// The directory this subscription watches.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next event or subscription failure.
    pub async fn next(&mut self) -> Option<Result<FileEvent>> {
        self.events.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// Subscriber that watches a single directory non-recursively with the
/// platform's recommended `notify` backend. Files created in the directory and
/// files moved into it are both forwarded as creations.
#[derive(Debug, Clone)]
pub struct NotifySubscriber {
    /// Channel capacity for each subscription.
    buffer: usize,
}

impl NotifySubscriber {
    /// Create a new subscriber.
    pub fn new() -> Self {
        Self {
            buffer: EVENT_BUFFER,
        }
    }

    /// Set the per-subscription channel capacity.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl Default for NotifySubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for NotifySubscriber {
    fn subscribe(&self, path: &Path) -> Result<Subscription> {
        if !path.exists() {
            return Err(WatcherError::DirectoryNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(WatcherError::NotADirectory(path.to_path_buf()));
        }

        let (event_tx, mut subscription) = Subscription::channel(path, self.buffer);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let paths = arrivals(&event);
                    if paths.is_empty() {
                        let kind = FileEventKind::from(event.kind);
                        trace!("Ignoring {kind:?} for {:?}", event.paths);
                        return;
                    }

                    for path in paths {
                        let file_event = FileEvent::observed(FileEventKind::Created, path);
                        if let Err(e) = event_tx.blocking_send(Ok(file_event)) {
                            debug!("Subscription receiver gone, dropping event: {e}");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                    let _ = event_tx.blocking_send(Err(WatcherError::Notify(e)));
                }
            },
        )?;

        watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!("Watching directory: {}", path.display());

        subscription.native = Some(watcher);
        Ok(subscription)
    }
}

/// Paths that became new entries of the watched directory.
///
/// A file moved in counts as a creation. `RenameMode::Both` repeats the
/// destination of a `RenameMode::To` already reported for the same move, and
/// `RenameMode::Any` names either side, so only paths still present are kept.
fn arrivals(event: &notify::Event) -> Vec<PathBuf> {
    use notify::EventKind;
    use notify::event::{ModifyKind, RenameMode};

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.clone()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.exists()).cloned().collect()
        }
        _ => Vec::new(),
    }
}
