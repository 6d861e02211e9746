//! Event-driven dispatcher with bounded concurrency.
//!
//! ```text
//! FileEvent ──► qualify ──► AdmissionGate ──► Job ──► Processor
//!                               │ saturated          │ completion
//!                               ▼                    ▼
//!                         PendingQueue ◄────── drainer task
//!                               │ full
//!                               ▼
//!                            dropped
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use watchdir_directory_watcher::FileEvent;

use crate::error::Result;
use crate::gate::{AdmissionGate, AdmissionPermit};
use crate::job::{Job, JobState};
use crate::processor::Processor;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, PendingQueue};
use crate::store::ConfigStore;

/// What happened to one candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A job was started immediately.
    Admitted,
    /// The file is waiting in the pending queue.
    Queued,
    /// Gate and queue were both full; the file was shed.
    Dropped,
    /// The event does not describe a qualifying file.
    Ignored(IgnoreReason),
}

/// Why an event was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a creation event.
    NotCreation,
    /// The new entry is a directory.
    Directory,
    /// The entry disappeared before it could be inspected.
    Vanished,
    /// The base name matches none of the active patterns.
    PatternMismatch,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    ignored: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, state: JobState) {
        match state {
            JobState::Completed => Self::bump(&self.completed),
            JobState::Failed => Self::bump(&self.failed),
            _ => {}
        }
    }
}

/// Point-in-time view of dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs started, immediately or from the queue.
    pub admitted: u64,
    /// Files that went through the pending queue.
    pub queued: u64,
    /// Files shed because gate and queue were full.
    pub dropped: u64,
    /// Events that did not qualify.
    pub ignored: u64,
    /// Jobs that completed successfully.
    pub completed: u64,
    /// Jobs whose processor reported an error.
    pub failed: u64,
    /// Jobs holding gate capacity right now.
    pub in_flight: usize,
    /// Files waiting in the queue right now.
    pub pending: usize,
    /// Current gate capacity.
    pub capacity: usize,
}

/// Result of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still running when the grace period ran out.
    pub unfinished: usize,
    /// Queued files that were never admitted.
    pub abandoned: usize,
}

impl ShutdownReport {
    /// Whether every admitted job finished and nothing was left queued.
    pub fn is_clean(&self) -> bool {
        self.unfinished == 0 && self.abandoned == 0
    }
}

/// Routes qualifying files to the processor under the admission gate.
pub struct Dispatcher {
    /// Shared configuration.
    config: Arc<ConfigStore>,

    /// Concurrency limit.
    gate: AdmissionGate,

    /// Overflow for files that could not be admitted.
    queue: PendingQueue,

    /// Does the work for each admitted file.
    processor: Arc<dyn Processor>,

    /// Tracks running jobs for shutdown.
    tracker: TaskTracker,

    /// Wakes the drainer after completions and resizes.
    drain_wake: Arc<Notify>,

    /// Activity counters.
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Create a dispatcher whose gate is sized from the current configuration.
    pub fn new(config: Arc<ConfigStore>, processor: Arc<dyn Processor>) -> Self {
        let capacity = config.current().config.concurrency_cap;
        Self {
            config,
            gate: AdmissionGate::new(capacity),
            queue: PendingQueue::new(DEFAULT_QUEUE_CAPACITY),
            processor,
            tracker: TaskTracker::new(),
            drain_wake: Arc::new(Notify::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Set the pending queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue = PendingQueue::new(capacity);
        self
    }

    /// Shared configuration store.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// The admission gate.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// The pending queue.
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Filter an event and dispatch it if it names a qualifying file.
    pub fn handle_event(&self, event: &FileEvent) -> DispatchOutcome {
        match self.qualify(event) {
            Ok(()) => {
                info!("Found matching file: {}", event.path.display());
                self.dispatch(event.path.clone())
            }
            Err(reason) => {
                Counters::bump(&self.counters.ignored);
                debug!("Ignoring {} ({reason:?})", event.path.display());
                DispatchOutcome::Ignored(reason)
            }
        }
    }

    fn qualify(&self, event: &FileEvent) -> std::result::Result<(), IgnoreReason> {
        if !event.is_creation() {
            return Err(IgnoreReason::NotCreation);
        }
        if event.is_directory() {
            return Err(IgnoreReason::Directory);
        }
        if !event.is_file() {
            warn!("Failed to get file info for {}", event.path.display());
            return Err(IgnoreReason::Vanished);
        }
        if !self.config.current().patterns.matches(&event.path) {
            return Err(IgnoreReason::PatternMismatch);
        }
        Ok(())
    }

    /// Admit `path` if capacity allows, otherwise queue it, otherwise shed it.
    ///
    /// While files are already waiting, new arrivals join the back of the
    /// queue instead of racing them for freed capacity.
    pub fn dispatch(&self, path: PathBuf) -> DispatchOutcome {
        if self.queue.is_empty() {
            if let Some(permit) = self.gate.try_acquire() {
                self.spawn_job(path, permit);
                return DispatchOutcome::Admitted;
            }
        }

        let path_display = path.display().to_string();
        if self.queue.offer(path) {
            Counters::bump(&self.counters.queued);
            warn!("All workers busy, adding {path_display} to pending queue");
            self.drain_wake.notify_one();
            DispatchOutcome::Queued
        } else {
            Counters::bump(&self.counters.dropped);
            error!("Pending queue full, file dropped: {path_display}");
            DispatchOutcome::Dropped
        }
    }

    /// Admit queued files until the queue is empty or the gate is saturated.
    ///
    /// Capacity is taken before a path leaves the queue, so a path is never
    /// removed without being admitted. Returns the number of jobs started.
    pub fn drain(&self) -> usize {
        let mut started = 0;
        while !self.queue.is_empty() {
            let Some(permit) = self.gate.try_acquire() else {
                break;
            };
            let Some(path) = self.queue.try_take() else {
                permit.release();
                break;
            };
            debug!("Admitting pending file {}", path.display());
            self.spawn_job(path, permit);
            started += 1;
        }
        started
    }

    /// Start the task that drains the queue whenever capacity may have freed up.
    pub fn spawn_drainer(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = this.drain_wake.notified() => {
                        let started = this.drain();
                        if started > 0 {
                            debug!("Drained {started} pending file(s), {} left", this.queue.len());
                        }
                    }
                }
            }
            debug!("Pending queue drainer stopped");
        })
    }

    fn spawn_job(&self, path: PathBuf, permit: AdmissionPermit) {
        Counters::bump(&self.counters.admitted);
        let job = Job::admit(path, permit);
        let processor = Arc::clone(&self.processor);
        let counters = Arc::clone(&self.counters);
        let drain_wake = Arc::clone(&self.drain_wake);

        self.tracker.spawn(async move {
            // The inner task has dropped the job, and with it the permit,
            // by the time its handle resolves, even if the processor panicked.
            let path = job.path().to_path_buf();
            let run = tokio::spawn(async move { job.run(processor.as_ref()).await });
            let state = match run.await {
                Ok(outcome) => outcome.state,
                Err(e) => {
                    error!("Job for {} aborted: {e}", path.display());
                    JobState::Failed
                }
            };
            counters.record(state);
            drain_wake.notify_one();
        });
    }

    /// Change the gate capacity and let the drainer use any new room.
    pub fn resize(&self, capacity: usize) -> Result<u64> {
        let generation = self.gate.resize(capacity)?;
        self.drain_wake.notify_one();
        Ok(generation)
    }

    /// Snapshot of the counters and current occupancy.
    pub fn stats(&self) -> DispatchStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DispatchStats {
            admitted: load(&self.counters.admitted),
            queued: load(&self.counters.queued),
            dropped: load(&self.counters.dropped),
            ignored: load(&self.counters.ignored),
            completed: load(&self.counters.completed),
            failed: load(&self.counters.failed),
            in_flight: self.gate.in_flight(),
            pending: self.queue.len(),
            capacity: self.gate.capacity(),
        }
    }

    /// Stop tracking new work and wait up to `grace` for running jobs.
    ///
    /// Queued files are not admitted any more; they are reported as abandoned.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.tracker.close();

        let unfinished = match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => 0,
            Err(_) => self.tracker.len(),
        };
        let report = ShutdownReport {
            unfinished,
            abandoned: self.queue.len(),
        };

        if report.unfinished > 0 {
            warn!(
                "{} job(s) still running after {grace:?} shutdown grace period",
                report.unfinished
            );
        }
        if report.abandoned > 0 {
            warn!("Abandoning {} pending file(s)", report.abandoned);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessorError;
    use crate::processor::ProcessReport;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use watchdir_directory_watcher::{FileAttributes, FileEventKind, WatchConfig};

    /// Processor that blocks until the test hands out a completion.
    struct Manual {
        finish: Semaphore,
        started: Mutex<Vec<PathBuf>>,
    }

    impl Manual {
        fn new() -> Self {
            Self {
                finish: Semaphore::new(0),
                started: Mutex::new(Vec::new()),
            }
        }

        fn complete(&self, n: usize) {
            self.finish.add_permits(n);
        }

        fn started(&self) -> Vec<PathBuf> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Processor for Manual {
        fn name(&self) -> &str {
            "manual"
        }

        async fn execute(
            &self,
            path: &Path,
        ) -> std::result::Result<ProcessReport, ProcessorError> {
            self.started.lock().unwrap().push(path.to_path_buf());
            let permit = self
                .finish
                .acquire()
                .await
                .map_err(|e| ProcessorError::Failed(e.to_string()))?;
            permit.forget();
            Ok(ProcessReport {
                size: 0,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn dispatcher(cap: usize, queue: usize) -> (Arc<Dispatcher>, Arc<Manual>) {
        let config = Arc::new(ConfigStore::new(
            WatchConfig::new("/watch")
                .with_pattern("*.html")
                .with_concurrency_cap(cap),
        ));
        let processor = Arc::new(Manual::new());
        let dispatcher = Dispatcher::new(config, processor.clone()).with_queue_capacity(queue);
        (Arc::new(dispatcher), processor)
    }

    fn created(path: &str) -> FileEvent {
        FileEvent::new(FileEventKind::Created, path).with_attributes(FileAttributes::file(1))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_pattern_filter() {
        let (dispatcher, _) = dispatcher(1, 4);

        assert_eq!(
            dispatcher.handle_event(&created("/watch/notes.txt")),
            DispatchOutcome::Ignored(IgnoreReason::PatternMismatch)
        );
        assert_eq!(
            dispatcher.handle_event(&created("/watch/index.html")),
            DispatchOutcome::Admitted
        );
    }

    #[tokio::test]
    async fn test_ignores_non_qualifying_events() {
        let (dispatcher, _) = dispatcher(1, 4);

        let dir = FileEvent::new(FileEventKind::Created, "/watch/sub.html")
            .with_attributes(FileAttributes::directory());
        let gone = FileEvent::new(FileEventKind::Created, "/watch/gone.html");
        let modified = FileEvent::new(FileEventKind::Modified, "/watch/a.html")
            .with_attributes(FileAttributes::file(1));

        assert_eq!(
            dispatcher.handle_event(&dir),
            DispatchOutcome::Ignored(IgnoreReason::Directory)
        );
        assert_eq!(
            dispatcher.handle_event(&gone),
            DispatchOutcome::Ignored(IgnoreReason::Vanished)
        );
        assert_eq!(
            dispatcher.handle_event(&modified),
            DispatchOutcome::Ignored(IgnoreReason::NotCreation)
        );
        assert_eq!(dispatcher.stats().ignored, 3);
    }

    #[tokio::test]
    async fn test_overflow_then_shed() {
        let (dispatcher, processor) = dispatcher(1, 1);

        assert_eq!(dispatcher.dispatch("a.html".into()), DispatchOutcome::Admitted);
        assert_eq!(dispatcher.dispatch("b.html".into()), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch("c.html".into()), DispatchOutcome::Dropped);

        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 1);
        processor.complete(2);
    }

    #[tokio::test]
    async fn test_drain_is_fifo() {
        let (dispatcher, processor) = dispatcher(1, 4);

        dispatcher.dispatch("a.html".into());
        dispatcher.dispatch("b.html".into());
        dispatcher.dispatch("c.html".into());
        settle().await;

        processor.complete(1);
        settle().await;
        assert_eq!(dispatcher.drain(), 1);
        settle().await;

        assert_eq!(
            processor.started(),
            vec![PathBuf::from("a.html"), PathBuf::from("b.html")]
        );
        assert_eq!(dispatcher.queue().try_take(), Some(PathBuf::from("c.html")));
        processor.complete(1);
    }

    #[tokio::test]
    async fn test_arrivals_do_not_jump_the_queue() {
        let (dispatcher, processor) = dispatcher(1, 4);

        dispatcher.dispatch("a.html".into());
        dispatcher.dispatch("b.html".into());
        processor.complete(1);
        settle().await;
        assert_eq!(dispatcher.gate().in_flight(), 0);

        // Capacity is free, but b is still waiting.
        assert_eq!(dispatcher.dispatch("c.html".into()), DispatchOutcome::Queued);
        assert_eq!(dispatcher.drain(), 1);
        settle().await;
        assert_eq!(processor.started().last(), Some(&PathBuf::from("b.html")));
        processor.complete(2);
    }

    #[tokio::test]
    async fn test_drain_stops_when_queue_empty() {
        let (dispatcher, _) = dispatcher(3, 4);
        assert_eq!(dispatcher.drain(), 0);
        assert_eq!(dispatcher.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_resize_wakes_drainer() {
        let (dispatcher, processor) = dispatcher(1, 4);
        let shutdown = CancellationToken::new();
        let drainer = dispatcher.spawn_drainer(shutdown.clone());

        dispatcher.dispatch("a.html".into());
        dispatcher.dispatch("b.html".into());
        dispatcher.dispatch("c.html".into());

        dispatcher.resize(3).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.stats().admitted < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(dispatcher.stats().pending, 0);

        processor.complete(3);
        shutdown.cancel();
        drainer.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_jobs() {
        let (dispatcher, processor) = dispatcher(2, 4);
        dispatcher.dispatch("a.html".into());
        dispatcher.dispatch("b.html".into());
        processor.complete(2);

        let report = dispatcher.shutdown(Duration::from_secs(1)).await;
        assert!(report.is_clean());
        assert_eq!(dispatcher.stats().completed, 2);
    }

    /// Processor that panics on `a.html` and succeeds on everything else.
    struct Panics;

    #[async_trait]
    impl Processor for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn execute(
            &self,
            path: &Path,
        ) -> std::result::Result<ProcessReport, ProcessorError> {
            if path == Path::new("a.html") {
                panic!("processor blew up on {}", path.display());
            }
            Ok(ProcessReport {
                size: 0,
                elapsed: Duration::ZERO,
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_job_frees_slot_for_queue() {
        let config = Arc::new(ConfigStore::new(
            WatchConfig::new("/watch")
                .with_pattern("*.html")
                .with_concurrency_cap(1),
        ));
        let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(Panics)));
        let shutdown = CancellationToken::new();
        let drainer = dispatcher.spawn_drainer(shutdown.clone());

        assert_eq!(dispatcher.dispatch("a.html".into()), DispatchOutcome::Admitted);
        assert_eq!(dispatcher.dispatch("b.html".into()), DispatchOutcome::Queued);

        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.stats().completed < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_flight, 0);

        shutdown.cancel();
        drainer.await.unwrap();
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_unfinished() {
        let (dispatcher, _processor) = dispatcher(1, 4);
        dispatcher.dispatch("a.html".into());
        dispatcher.dispatch("b.html".into());

        let report = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(
            report,
            ShutdownReport {
                unfinished: 1,
                abandoned: 1,
            }
        );
    }
}
