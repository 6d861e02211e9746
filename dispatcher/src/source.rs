//! Supervised event source.
//!
//! Wraps an [`EventSubscriber`] in a restart loop: a failed subscription is
//! replaced after a fixed backoff unless shutdown was requested meanwhile.
//! Creations that happen between a failure and the resubscription are not
//! replayed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use watchdir_directory_watcher::{EventSubscriber, Subscription, WatcherError};

use crate::dispatcher::Dispatcher;
use crate::store::ConfigStore;

/// Default pause before resubscribing after a failure.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Counters collected while the source ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceReport {
    /// Subscriptions opened successfully.
    pub subscriptions: u64,

    /// Subscription attempts or sessions that failed.
    pub failures: u64,

    /// Events handed to the dispatcher.
    pub events: u64,
}

enum SessionEnd {
    Shutdown,
    PathChanged,
    Failed(WatcherError),
}

/// Feeds directory events into a [`Dispatcher`] until shutdown.
pub struct EventSource {
    /// Opens subscriptions.
    subscriber: Arc<dyn EventSubscriber>,

    /// Provides the directory to watch.
    config: Arc<ConfigStore>,

    /// Pause between a failure and the next attempt.
    backoff: Duration,
}

impl EventSource {
    /// Create a new event source.
    pub fn new(subscriber: Arc<dyn EventSubscriber>, config: Arc<ConfigStore>) -> Self {
        Self {
            subscriber,
            config,
            backoff: DEFAULT_RESTART_BACKOFF,
        }
    }

    /// Set the restart backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(
        &self,
        dispatcher: &Dispatcher,
        shutdown: CancellationToken,
    ) -> SourceReport {
        let mut changes = self.config.subscribe();
        let mut report = SourceReport::default();

        while !shutdown.is_cancelled() {
            let snapshot = self.config.current();
            let end = match self.subscriber.subscribe(&snapshot.config.watch_path) {
                Ok(subscription) => {
                    report.subscriptions += 1;
                    info!(
                        "Starting directory monitoring: {} (max concurrency {}, process delay {:?})",
                        snapshot.config.watch_path.display(),
                        dispatcher.gate().capacity(),
                        snapshot.config.process_delay
                    );
                    self.pump(subscription, dispatcher, &shutdown, &mut changes, &mut report)
                        .await
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::PathChanged => {
                    info!("Watch directory changed, resubscribing");
                }
                SessionEnd::Failed(e) => {
                    report.failures += 1;
                    error!("File watcher error: {e}; restarting in {:?}", self.backoff);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }

        info!(
            "Directory monitoring stopped after {} subscription(s), {} event(s)",
            report.subscriptions, report.events
        );
        report
    }

    async fn pump(
        &self,
        mut subscription: Subscription,
        dispatcher: &Dispatcher,
        shutdown: &CancellationToken,
        changes: &mut watch::Receiver<u64>,
        report: &mut SourceReport,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                Ok(()) = changes.changed() => {
                    changes.borrow_and_update();
                    if self.config.current().config.watch_path != subscription.path() {
                        return SessionEnd::PathChanged;
                    }
                }
                message = subscription.next() => match message {
                    Some(Ok(event)) => {
                        report.events += 1;
                        dispatcher.handle_event(&event);
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => {
                        return SessionEnd::Failed(WatcherError::SubscriptionClosed(
                            subscription.path().to_path_buf(),
                        ));
                    }
                },
            }
        }
    }
}
