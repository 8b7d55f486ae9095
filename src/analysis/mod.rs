//! SLA analysis orchestration.
//!
//! Sliced-file decoding is fragile and slow, so it never runs in the host
//! process. The [`AnalysisOrchestrator`] launches the worker (by default
//! this executable's `sla-analysis` subcommand), polls it, and normalizes
//! its report into an [`AnalysisResult`](chitu_shared::AnalysisResult).
//! [`AnalysisQueue`] feeds it one file at a time.

pub mod orchestrator;
pub mod process;
pub mod protocol;
pub mod queue;

pub use orchestrator::AnalysisOrchestrator;
pub use process::{PollPolicy, WorkerCommand};
pub use protocol::{WorkerAnalysis, WorkerReport, parse_output};
pub use queue::{AnalysisFinished, AnalysisQueue};
