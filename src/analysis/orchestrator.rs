use std::sync::{Arc, Mutex};

use chitu_shared::config::AnalysisConfig;
use chitu_shared::metadata::has_cached_analysis;
use chitu_shared::{AnalysisError, AnalysisJob, AnalysisOutcome, AnalysisResult, JobControl};

use super::process::{PollPolicy, ProcessExit, WorkerCommand};
use super::protocol::parse_output;

/// Runs one analysis job at a time in an isolated worker process.
#[derive(Debug)]
pub struct AnalysisOrchestrator {
    command: WorkerCommand,
    policy: PollPolicy,
    current: Mutex<Option<Arc<JobControl>>>,
}

impl AnalysisOrchestrator {
    pub fn new(command: WorkerCommand, policy: PollPolicy) -> Self {
        Self {
            command,
            policy,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        Ok(Self::new(WorkerCommand::from_config(config)?, PollPolicy::from_config(config)))
    }

    /// Abort the running job, if any. Returns false when idle.
    pub fn abort(&self, reenqueue: bool) -> bool {
        let Ok(current) = self.current.lock() else {
            return false;
        };
        match current.as_ref() {
            Some(control) => {
                control.request_abort(reenqueue);
                true
            }
            None => false,
        }
    }

    /// Publish `job` for `abort` ahead of `analyze`, for callers with work to do before launching.
    pub fn track(&self, job: &AnalysisJob) -> RunningJob<'_> {
        RunningJob::track(&self.current, job.control())
    }

    pub fn is_busy(&self) -> bool {
        self.current.lock().map(|current| current.is_some()).unwrap_or(false)
    }

    /// Analyse `job`. Every failure degrades to the fallback record.
    pub async fn analyze(&self, job: &AnalysisJob) -> AnalysisOutcome {
        if let Some(prior) = job.prior_analysis().filter(|prior| has_cached_analysis(prior)) {
            tracing::debug!("Using cached analysis for {}", job.path().display());
            return AnalysisOutcome::Cached(prior.clone());
        }

        let _running = RunningJob::track(&self.current, job.control());
        match self.run(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Analysis for {} ran into error: {}", job.path().display(), e);
                AnalysisOutcome::Completed(AnalysisResult::fallback(job.path()))
            }
        }
    }

    async fn run(&self, job: &AnalysisJob) -> Result<AnalysisOutcome, AnalysisError> {
        let control = job.control();
        if control.is_abort_requested() {
            return Ok(AnalysisOutcome::Aborted {
                reenqueue: control.reenqueue_on_abort(),
            });
        }

        let invocation = self.command.invocation(job.path())?;
        tracing::debug!("Invoking analysis command: {}", invocation);
        let process = invocation.spawn()?;

        let output = match process.wait(&control, &self.policy).await? {
            ProcessExit::Finished(output) => output,
            ProcessExit::Aborted => {
                return Ok(AnalysisOutcome::Aborted {
                    reenqueue: control.reenqueue_on_abort(),
                });
            }
        };
        tracing::debug!("Got output: {:?}", output);

        let fresh = parse_output(&output, job.path())?;
        let result = match job.prior_analysis() {
            Some(prior) => fresh
                .merge_prior(prior)
                .map_err(|e| AnalysisError::Merge(e.to_string()))?,
            None => fresh,
        };
        Ok(AnalysisOutcome::Completed(result))
    }
}

/// Publishes a job's control block for `abort` while it runs.
pub struct RunningJob<'a> {
    slot: &'a Mutex<Option<Arc<JobControl>>>,
}

impl<'a> RunningJob<'a> {
    fn track(slot: &'a Mutex<Option<Arc<JobControl>>>, control: Arc<JobControl>) -> Self {
        if let Ok(mut current) = slot.lock() {
            *current = Some(control);
        }
        Self { slot }
    }
}

impl Drop for RunningJob<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.slot.lock() {
            *current = None;
        }
    }
}
