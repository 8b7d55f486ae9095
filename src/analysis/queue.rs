// FIFO analysis queue driving one orchestrator on a background task.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chitu_shared::{AnalysisError, AnalysisJob, AnalysisOutcome, MetadataStore};

use super::orchestrator::AnalysisOrchestrator;

/// Emitted once per dequeued job.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisFinished {
    pub job_id: u64,
    pub path: PathBuf,
    pub outcome: AnalysisOutcome,
}

pub struct AnalysisQueue {
    sender: mpsc::UnboundedSender<PathBuf>,
    orchestrator: Arc<AnalysisOrchestrator>,
    paused: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AnalysisQueue {
    /// Start the queue task. Finished jobs are reported on the returned receiver.
    pub fn start(
        orchestrator: Arc<AnalysisOrchestrator>,
        store: Arc<dyn MetadataStore>,
    ) -> (Self, mpsc::UnboundedReceiver<AnalysisFinished>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (paused, paused_rx) = watch::channel(false);

        let worker = QueueWorker {
            receiver,
            pending: VecDeque::new(),
            orchestrator: orchestrator.clone(),
            store,
            paused: paused_rx,
            finished: finished_tx,
            next_id: 1,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                sender,
                orchestrator,
                paused,
                task,
            },
            finished_rx,
        )
    }

    pub fn enqueue(&self, path: impl Into<PathBuf>) -> Result<(), AnalysisError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(AnalysisError::RelativePath(path));
        }
        tracing::debug!("Queued {} for analysis", path.display());
        self.sender
            .send(path)
            .map_err(|e| AnalysisError::Launch(format!("analysis queue stopped, dropped {}", e.0.display())))
    }

    /// Abort the running job. Returns false when nothing is running.
    pub fn abort_current(&self, reenqueue: bool) -> bool {
        self.orchestrator.abort(reenqueue)
    }

    /// Stop analysing; the running job is aborted and requeued.
    pub fn pause(&self) {
        tracing::info!("Pausing analysis queue");
        self.paused.send_replace(true);
        self.orchestrator.abort(true);
    }

    pub fn resume(&self) {
        tracing::info!("Resuming analysis queue");
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Drain the remaining queued paths and stop. The running job is aborted.
    pub async fn shutdown(self) {
        self.paused.send_replace(false);
        self.orchestrator.abort(false);
        drop(self.sender);
        if let Err(e) = self.task.await {
            tracing::error!("Analysis queue task failed: {}", e);
        }
    }
}

struct QueueWorker {
    receiver: mpsc::UnboundedReceiver<PathBuf>,
    /// Requeued paths, served before new ones.
    pending: VecDeque<PathBuf>,
    orchestrator: Arc<AnalysisOrchestrator>,
    store: Arc<dyn MetadataStore>,
    paused: watch::Receiver<bool>,
    finished: mpsc::UnboundedSender<AnalysisFinished>,
    next_id: u64,
}

impl QueueWorker {
    async fn run(mut self) {
        loop {
            if self.paused.wait_for(|paused| !*paused).await.is_err() {
                break;
            }

            let path = match self.pending.pop_front() {
                Some(path) => path,
                None => match self.receiver.recv().await {
                    Some(path) => path,
                    None => break,
                },
            };

            if *self.paused.borrow() {
                self.pending.push_front(path);
                continue;
            }

            self.process(path).await;
        }
        tracing::debug!("Analysis queue stopped");
    }

    async fn process(&mut self, path: PathBuf) {
        let mut job = match AnalysisJob::new(self.next_id, path) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!("Skipping analysis: {}", e);
                return;
            }
        };

        // From here a pause either aborts this job or is seen below.
        let running = self.orchestrator.track(&job);
        let prior = self.store.load(job.path()).await;
        if *self.paused.borrow() {
            tracing::debug!("Queue paused, holding {}", job.path().display());
            self.pending.push_front(job.path().to_path_buf());
            return;
        }
        self.next_id += 1;
        if let Some(prior) = prior {
            job = job.with_prior_analysis(prior);
        }

        tracing::info!("Analysing {}", job.path().display());
        let outcome = self.orchestrator.analyze(&job).await;
        drop(running);

        match &outcome {
            AnalysisOutcome::Completed(result) => {
                self.store.save(job.path(), result).await;
                tracing::info!("Analysis of {} finished", job.path().display());
            }
            AnalysisOutcome::Cached(_) => {
                tracing::info!("Analysis of {} already stored", job.path().display());
            }
            AnalysisOutcome::Aborted { reenqueue: true } => {
                tracing::info!("Analysis of {} aborted, requeued", job.path().display());
                self.pending.push_front(job.path().to_path_buf());
            }
            AnalysisOutcome::Aborted { reenqueue: false } => {
                tracing::info!("Analysis of {} aborted", job.path().display());
            }
        }

        let finished = AnalysisFinished {
            job_id: job.id(),
            path: job.path().to_path_buf(),
            outcome,
        };
        if self.finished.send(finished).is_err() {
            tracing::debug!("Nobody listening for finished analyses");
        }
    }
}
