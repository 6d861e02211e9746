//! Reload and shutdown handling.
//!
//! Every external trigger becomes a [`Control`] message on one channel, and a
//! single task applies them in order. A reload therefore never overlaps
//! another reload or a shutdown.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use watchdir_directory_watcher::ConfigLoader;

use crate::dispatcher::{Dispatcher, ShutdownReport};
use crate::error::Result;
use crate::store::ConfigStore;

/// Default time to wait for running jobs on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Capacity of the control channel.
pub const CONTROL_BUFFER: usize = 16;

/// How long the configuration file must stay quiet before a reload.
pub const CONFIG_SETTLE: Duration = Duration::from_millis(250);

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSource {
    /// SIGHUP.
    Signal,
    /// The configuration file changed on disk.
    ConfigFile,
}

impl fmt::Display for ReloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "signal"),
            Self::ConfigFile => write!(f, "config file change"),
        }
    }
}

/// A request for the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Re-read the configuration and apply it.
    Reload(ReloadSource),
    /// Stop watching and wind down running jobs.
    Shutdown,
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    /// Configuration generation now in effect.
    pub config_generation: u64,

    /// Gate generation now in effect.
    pub gate_generation: u64,

    /// Concurrency cap before the reload.
    pub previous_cap: usize,

    /// Concurrency cap after the reload.
    pub cap: usize,
}

/// Applies [`Control`] requests to the running dispatcher.
pub struct Lifecycle {
    /// Re-reads the configuration file.
    loader: ConfigLoader,

    /// Store the reloaded configuration is swapped into.
    config: Arc<ConfigStore>,

    /// Dispatcher whose gate follows the configuration.
    dispatcher: Arc<Dispatcher>,

    /// Cancelled on shutdown; stops the event source and the drainer.
    cancel: CancellationToken,

    /// How long shutdown waits for running jobs.
    grace: Duration,
}

impl Lifecycle {
    /// Create a controller for `dispatcher`.
    pub fn new(
        loader: ConfigLoader,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            loader,
            config: Arc::clone(dispatcher.config()),
            dispatcher,
            cancel,
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set the shutdown grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Load the configuration again and apply it.
    ///
    /// On error nothing changes: the previous configuration and gate stay in
    /// effect. An empty file counts as an error.
    pub fn reload(&self, source: ReloadSource) -> Result<ReloadReport> {
        debug!(
            "Reloading configuration from {} ({source})",
            self.loader.path().display()
        );
        let config = self.loader.reload()?;

        let (previous, next) = self.config.replace(config);
        let gate_generation = self.dispatcher.resize(next.config.concurrency_cap)?;

        let report = ReloadReport {
            config_generation: next.generation,
            gate_generation,
            previous_cap: previous.config.concurrency_cap,
            cap: next.config.concurrency_cap,
        };
        info!(
            "Configuration reloaded on {source}: max concurrency {} -> {}, process delay {:?} -> {:?}",
            report.previous_cap,
            report.cap,
            previous.config.process_delay,
            next.config.process_delay
        );
        Ok(report)
    }

    /// Cancel the event source and wait for running jobs.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Stopping directory monitoring");
        self.cancel.cancel();
        self.dispatcher.shutdown(self.grace).await
    }

    /// Apply requests in order until a shutdown is requested or every sender
    /// is gone, then shut down.
    ///
    /// A second shutdown request during the grace period stops waiting for
    /// running jobs.
    pub async fn run(&self, mut control: mpsc::Receiver<Control>) -> ShutdownReport {
        while let Some(request) = control.recv().await {
            match request {
                Control::Reload(source) => {
                    if let Err(e) = self.reload(source) {
                        error!("Configuration reload failed, keeping previous settings: {e}");
                    }
                }
                Control::Shutdown => break,
            }
        }

        let graceful = self.shutdown();
        tokio::pin!(graceful);
        loop {
            tokio::select! {
                // Polled first so the source is cancelled before any forced stop.
                biased;
                report = &mut graceful => return report,
                request = control.recv() => match request {
                    Some(Control::Shutdown) => {
                        warn!("Shutdown requested again, not waiting for running jobs");
                        return self.dispatcher.shutdown(Duration::ZERO).await;
                    }
                    Some(Control::Reload(source)) => {
                        debug!("Ignoring reload on {source} during shutdown");
                    }
                    None => return graceful.await,
                },
            }
        }
    }
}

/// Translate process signals into [`Control`] requests.
///
/// SIGHUP requests a reload; SIGINT and SIGTERM request shutdown. The
/// listener keeps running until the controller goes away, so a repeated
/// interrupt reaches [`Lifecycle::run`].
#[cfg(unix)]
pub fn spawn_signal_listener(control: mpsc::Sender<Control>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    Control::Reload(ReloadSource::Signal)
                }
                _ = interrupt.recv() => {
                    info!("Received SIGINT, shutting down");
                    Control::Shutdown
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, shutting down");
                    Control::Shutdown
                }
            };
            if control.send(request).await.is_err() {
                break;
            }
        }
    }))
}

/// Translate Ctrl-C into shutdown requests.
#[cfg(not(unix))]
pub fn spawn_signal_listener(control: mpsc::Sender<Control>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                break;
            }
            info!("Received Ctrl-C, shutting down");
            if control.send(Control::Shutdown).await.is_err() {
                break;
            }
        }
    }))
}

/// Watches the configuration file and requests a reload when it changes.
///
/// The parent directory is watched so editors that replace the file are
/// still noticed. A burst of writes turns into one reload once the file has
/// been quiet for [`CONFIG_SETTLE`]. Dropping the value stops the watch.
pub struct ConfigFileWatch {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigFileWatch {
    /// Start watching `path`. Must be called from within a Tokio runtime.
    pub fn start(path: &Path, control: mpsc::Sender<Control>) -> Result<Self> {
        let file_name = path.file_name().map(std::ffi::OsStr::to_os_string);
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // The task ends once the watcher, and the sender its callback owns, is dropped.
        let (changes_tx, changes_rx) = mpsc::channel(1);
        tokio::spawn(settle_changes(changes_rx, control, CONFIG_SETTLE));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Configuration file watch error: {e}");
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }
            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == file_name);
            if touches_config {
                // A full channel already holds an unseen change.
                let _ = changes_tx.try_send(());
            }
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        info!("Watching configuration file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// The watched configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Request one reload per burst of changes, after `settle` without another.
async fn settle_changes(
    mut changes: mpsc::Receiver<()>,
    control: mpsc::Sender<Control>,
    settle: Duration,
) {
    while changes.recv().await.is_some() {
        loop {
            match tokio::time::timeout(settle, changes.recv()).await {
                Ok(Some(())) => {}
                Ok(None) => return,
                Err(_) => break,
            }
        }
        debug!("Configuration file settled, requesting reload");
        if control
            .send(Control::Reload(ReloadSource::ConfigFile))
            .await
            .is_err()
        {
            return;
        }
    }
}

impl fmt::Debug for ConfigFileWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFileWatch")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
