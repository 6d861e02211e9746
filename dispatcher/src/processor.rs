//! File processors.
//!
//! A processor performs the actual unit of work for one admitted file. It may
//! be slow, it may fail, and it must enforce its own time budget.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ProcessorError;
use crate::store::ConfigStore;

/// Default wall-clock budget for a single file.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// What a processor reports about a finished file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Size of the processed file in bytes.
    pub size: u64,

    /// Time spent inside the processor.
    pub elapsed: Duration,
}

/// Trait for file processors.
///
/// Implementations must be safe to call concurrently up to the configured
/// concurrency cap.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process the file at `path`.
    async fn execute(&self, path: &Path) -> Result<ProcessReport, ProcessorError>;
}

/// Processor that waits for the configured delay, then inspects the file.
///
/// The delay is read from the [`ConfigStore`] on every call so reloads take
/// effect for the next file.
pub struct DelayProcessor {
    /// Source of `process_delay`.
    config: Arc<ConfigStore>,

    /// Wall-clock budget per file.
    timeout: Duration,
}

impl DelayProcessor {
    /// Create a new delay processor.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    /// Set the per-file timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn process(
        &self,
        path: &Path,
        start: Instant,
    ) -> Result<ProcessReport, ProcessorError> {
        let delay = self.config.current().config.process_delay;
        debug!("Simulating {delay:?} of work on {}", path.display());
        tokio::time::sleep(delay).await;

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ProcessorError::Failed(format!(
                "{} is no longer a regular file",
                path.display()
            )));
        }

        Ok(ProcessReport {
            size: metadata.len(),
            elapsed: start.elapsed(),
        })
    }
}

#[async_trait]
impl Processor for DelayProcessor {
    fn name(&self) -> &str {
        "delay"
    }

    async fn execute(&self, path: &Path) -> Result<ProcessReport, ProcessorError> {
        let start = Instant::now();
        info!("Start file processing: {}", path.display());

        let report = tokio::time::timeout(self.timeout, self.process(path, start))
            .await
            .map_err(|_| ProcessorError::Timeout(self.timeout))??;

        let name = path
            .file_name()
            .map(std::ffi::OsStr::to_string_lossy)
            .unwrap_or_default();
        info!(
            "File has been processed: {name} (size: {} bytes, time: {:?})",
            report.size, report.elapsed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use watchdir_directory_watcher::WatchConfig;

    fn store(delay: Duration) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(
            WatchConfig::default().with_process_delay(delay),
        ))
    }

    #[tokio::test]
    async fn test_reports_file_size() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("page.html");
        std::fs::write(&file, "<html></html>").unwrap();

        let processor = DelayProcessor::new(store(Duration::from_millis(20)));
        let report = processor.execute(&file).await.unwrap();

        assert_eq!(report.size, 13);
        assert!(report.elapsed >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let processor = DelayProcessor::new(store(Duration::ZERO));
        let err = processor
            .execute(Path::new("/nonexistent/watchdir/page.html"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Io(_)));
    }

    #[tokio::test]
    async fn test_enforces_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("slow.html");
        std::fs::write(&file, "x").unwrap();

        let processor = DelayProcessor::new(store(Duration::from_secs(120)))
            .with_timeout(Duration::from_millis(50));
        let err = processor.execute(&file).await.unwrap_err();

        assert!(matches!(err, ProcessorError::Timeout(t) if t == Duration::from_millis(50)));
    }
}
