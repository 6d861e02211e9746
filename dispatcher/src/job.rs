//! Per-file jobs.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ProcessorError;
use crate::gate::AdmissionPermit;
use crate::processor::{ProcessReport, Processor};

/// Lifecycle of a job.
///
/// `Queued` is membership in the pending queue. There is no cancelled state:
/// an admitted job always runs until the processor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the pending queue.
    Queued,
    /// Holding a unit of gate capacity.
    Admitted,
    /// Inside the processor.
    Running,
    /// Processor returned success.
    Completed,
    /// Processor returned an error.
    Failed,
}

impl JobState {
    /// Whether the job has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An admitted file, owned by the task that runs it.
#[derive(Debug)]
pub struct Job {
    path: PathBuf,
    permit: AdmissionPermit,
    state: JobState,
    admitted_at: Instant,
}

impl Job {
    /// Create an admitted job holding `permit`.
    pub fn admit(path: PathBuf, permit: AdmissionPermit) -> Self {
        info!(
            "Admitted {} under gate generation {}",
            path.display(),
            permit.generation()
        );
        Self {
            path,
            permit,
            state: JobState::Admitted,
            admitted_at: Instant::now(),
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Gate generation the job was admitted under.
    pub fn generation(&self) -> u64 {
        self.permit.generation()
    }

    /// Run the processor to completion and release the gate unit.
    ///
    /// Processor errors end the job in [`JobState::Failed`]; they are never retried.
    pub async fn run(mut self, processor: &dyn Processor) -> JobOutcome {
        self.state = JobState::Running;
        debug!("Running {} with {}", self.path.display(), processor.name());
        let result = processor.execute(&self.path).await;
        let elapsed = self.admitted_at.elapsed();

        let Self { path, permit, .. } = self;
        permit.release();

        match result {
            Ok(report) => {
                info!(
                    "Job for {} completed by {} in {elapsed:?}",
                    path.display(),
                    processor.name()
                );
                JobOutcome {
                    path,
                    state: JobState::Completed,
                    elapsed,
                    report: Some(report),
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    "Job for {} failed in {} after {elapsed:?}: {e}",
                    path.display(),
                    processor.name()
                );
                JobOutcome {
                    path,
                    state: JobState::Failed,
                    elapsed,
                    report: None,
                    error: Some(e),
                }
            }
        }
    }
}

/// How a job ended.
#[derive(Debug)]
pub struct JobOutcome {
    /// Path of the file.
    pub path: PathBuf,

    /// Terminal state.
    pub state: JobState,

    /// Time from admission to completion.
    pub elapsed: Duration,

    /// Processor report on success.
    pub report: Option<ProcessReport>,

    /// Processor error on failure.
    pub error: Option<ProcessorError>,
}
