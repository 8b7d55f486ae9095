use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::metadata::AnalysisResult;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Path is not absolute: {0}")]
    RelativePath(PathBuf),
    #[error("Failed to launch worker: {0}")]
    Launch(String),
    #[error("Worker reported error: {0}")]
    Worker(String),
    #[error("No analysis result found")]
    NoResult,
    #[error("Malformed analysis result: {0}")]
    Malformed(String),
    #[error("Worker timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to merge prior analysis: {0}")]
    Merge(String),
}

/// Cancellation flags shared between a job and whoever may cancel it.
#[derive(Debug, Default)]
pub struct JobControl {
    abort_requested: AtomicBool,
    reenqueue_on_abort: AtomicBool,
}

impl JobControl {
    pub fn request_abort(&self, reenqueue: bool) {
        self.reenqueue_on_abort.store(reenqueue, Ordering::Release);
        self.abort_requested.store(true, Ordering::Release);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    pub fn reenqueue_on_abort(&self) -> bool {
        self.reenqueue_on_abort.load(Ordering::Acquire)
    }
}

/// One file waiting for, or going through, analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    id: u64,
    path: PathBuf,
    prior_analysis: Option<Map<String, Value>>,
    control: Arc<JobControl>,
}

impl AnalysisJob {
    pub fn new(id: u64, path: impl Into<PathBuf>) -> Result<Self, AnalysisError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(AnalysisError::RelativePath(path));
        }
        Ok(Self {
            id,
            path,
            prior_analysis: None,
            control: Arc::new(JobControl::default()),
        })
    }

    pub fn with_prior_analysis(mut self, prior: Map<String, Value>) -> Self {
        self.prior_analysis = Some(prior);
        self
    }

    pub fn id(&self) -> u64 { self.id }
    pub fn path(&self) -> &Path { &self.path }
    pub fn prior_analysis(&self) -> Option<&Map<String, Value>> { self.prior_analysis.as_ref() }
    pub fn control(&self) -> Arc<JobControl> { self.control.clone() }

    pub fn abort(&self, reenqueue: bool) {
        self.control.request_abort(reenqueue);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.control.is_abort_requested()
    }
}

/// What analysing one job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(AnalysisResult),
    /// The prior analysis was complete; it is handed back exactly as stored.
    Cached(Map<String, Value>),
    /// Cancelled before a result was available; the caller decides on requeueing.
    Aborted { reenqueue: bool },
}

impl AnalysisOutcome {
    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            AnalysisOutcome::Completed(result) => Some(result),
            AnalysisOutcome::Cached(_) | AnalysisOutcome::Aborted { .. } => None,
        }
    }

    /// The metadata record to publish, `None` when aborted.
    pub fn to_record(&self) -> Result<Option<Map<String, Value>>, serde_json::Error> {
        match self {
            AnalysisOutcome::Completed(result) => result.to_map().map(Some),
            AnalysisOutcome::Cached(record) => Ok(Some(record.clone())),
            AnalysisOutcome::Aborted { .. } => Ok(None),
        }
    }
}
