// Worker process supervision: launch, poll, abort, collect output.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use chitu_shared::config::AnalysisConfig;
use chitu_shared::{AnalysisError, JobControl};

/// Program and leading arguments used to start the worker; the file path is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Uses the configured program, or re-invokes the running executable.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| AnalysisError::Launch(e.to_string()))?,
        };
        Ok(Self::new(program, config.worker_args.iter().cloned()))
    }

    pub fn invocation(&self, path: &Path) -> Result<WorkerInvocation, AnalysisError> {
        if !path.is_absolute() {
            return Err(AnalysisError::RelativePath(path.to_path_buf()));
        }
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push(path.as_os_str().to_os_string());
        Ok(WorkerInvocation {
            program: self.program.clone(),
            args,
        })
    }
}

/// Backoff for polling a running worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            initial: config.poll_interval(),
            max: config.max_poll_interval(),
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl fmt::Display for WorkerInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

impl WorkerInvocation {
    pub fn spawn(&self) -> Result<WorkerProcess, AnalysisError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::Launch(format!("{}: {}", self, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalysisError::Launch("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AnalysisError::Launch("worker stderr not captured".to_string()))?;

        Ok(WorkerProcess {
            child,
            stdout: tokio::spawn(read_to_string(stdout)),
            stderr: tokio::spawn(read_to_string(stderr)),
        })
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!("Error reading worker output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessExit {
    /// The worker's stdout.
    Finished(String),
    Aborted,
}

pub struct WorkerProcess {
    child: Child,
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

impl WorkerProcess {
    /// Wait for the worker, checking `control` between polls.
    pub async fn wait(mut self, control: &JobControl, policy: &PollPolicy) -> Result<ProcessExit, AnalysisError> {
        let started = Instant::now();
        let mut interval = policy.initial;

        loop {
            if control.is_abort_requested() {
                tracing::debug!("Abort requested, terminating worker");
                self.terminate().await;
                return Ok(ProcessExit::Aborted);
            }

            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Worker exited with {}", status);
                    return Ok(ProcessExit::Finished(self.collect_output().await));
                }
                Ok(None) => {}
                Err(e) => {
                    self.terminate().await;
                    return Err(AnalysisError::Launch(e.to_string()));
                }
            }

            if started.elapsed() >= policy.timeout {
                self.terminate().await;
                return Err(AnalysisError::Timeout(policy.timeout));
            }

            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(policy.max);
        }
    }

    async fn terminate(&mut self) {
        // kill() also reaps the child.
        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill worker: {}", e);
        }
        self.stdout.abort();
        self.stderr.abort();
    }

    /// Only stdout carries the report; stderr is logged.
    async fn collect_output(self) -> String {
        let output = self.stdout.await.unwrap_or_default();
        let stderr = self.stderr.await.unwrap_or_default();
        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            tracing::debug!("Worker stderr: {}", line);
        }
        output
    }
}
