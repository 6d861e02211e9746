use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watchdir_directory_watcher::{ConfigLoader, DEFAULT_CONFIG_PATH, NotifySubscriber};
use watchdir_dispatcher::{
    CONTROL_BUFFER, ConfigFileWatch, ConfigStore, DEFAULT_QUEUE_CAPACITY, DelayProcessor,
    Dispatcher, EventSource, Lifecycle, spawn_signal_listener,
};

/// Watch a directory and process newly created files with bounded concurrency.
#[derive(Debug, Parser)]
#[command(name = "watchdir", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Maximum number of files waiting for capacity before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seconds to wait for running jobs on shutdown.
    #[arg(long, default_value_t = 30)]
    shutdown_grace: u64,

    /// Seconds to wait before resubscribing after a watcher failure.
    #[arg(long, default_value_t = 5)]
    restart_backoff: u64,

    /// Log filter, e.g. `debug` or `watchdir_dispatcher=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Do not reload when the configuration file changes; only SIGHUP reloads.
    #[arg(long)]
    no_config_watch: bool,
}

fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log filter {level:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let loader = ConfigLoader::new(&args.config);
    let config = loader.load().with_context(|| {
        format!("failed to load configuration from {}", args.config.display())
    })?;
    info!("Loaded configuration from {}", args.config.display());

    let store = Arc::new(ConfigStore::new(config));
    let processor = Arc::new(DelayProcessor::new(Arc::clone(&store)));
    let dispatcher = Arc::new(
        Dispatcher::new(Arc::clone(&store), processor).with_queue_capacity(args.queue_capacity),
    );

    let shutdown = CancellationToken::new();
    let drainer = dispatcher.spawn_drainer(shutdown.clone());

    let source = EventSource::new(Arc::new(NotifySubscriber::new()), Arc::clone(&store))
        .with_backoff(Duration::from_secs(args.restart_backoff));
    let source_task = {
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { source.run(&dispatcher, shutdown).await })
    };

    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
    let signals = spawn_signal_listener(control_tx.clone())?;
    let _config_watch = if args.no_config_watch {
        None
    } else {
        match ConfigFileWatch::start(&args.config, control_tx.clone()) {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!("Configuration file watch unavailable, reload with SIGHUP only: {e}");
                None
            }
        }
    };
    drop(control_tx);

    let lifecycle = Lifecycle::new(loader, Arc::clone(&dispatcher), shutdown)
        .with_grace(Duration::from_secs(args.shutdown_grace));
    let report = lifecycle.run(control_rx).await;

    signals.abort();
    if let Err(e) = drainer.await {
        error!("Pending queue drainer panicked: {e}");
    }
    match source_task.await {
        Ok(source_report) => info!(
            "Event source stopped: {} subscription(s), {} failure(s), {} event(s)",
            source_report.subscriptions, source_report.failures, source_report.events
        ),
        Err(e) => error!("Event source panicked: {e}"),
    }

    let stats = dispatcher.stats();
    info!(
        "Shutdown complete: {} admitted, {} queued, {} dropped, {} completed, {} failed",
        stats.admitted, stats.queued, stats.dropped, stats.completed, stats.failed
    );
    if !report.is_clean() {
        warn!(
            "{} job(s) unfinished and {} pending file(s) abandoned at exit",
            report.unfinished, report.abandoned
        );
    }
    Ok(())
}
