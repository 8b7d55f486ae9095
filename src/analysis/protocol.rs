//! Text protocol spoken by the analysis worker.
//!
//! The worker prints a report to stdout. The first sentinel found decides
//! how the report is read:
//!
//! ```text
//! ERROR: <detail>            analysis failed
//! EMPTY: <detail>            nothing to measure
//! DONE:<secs>s
//! RESULTS:
//! <yaml mapping>             see [`ResultsReport`]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chitu_shared::metadata::{Dimensions, PrintingArea};
use chitu_shared::{AnalysisError, AnalysisResult};

pub const ERROR_SENTINEL: &str = "ERROR:";
pub const EMPTY_SENTINEL: &str = "EMPTY:";
pub const RESULTS_SENTINEL: &str = "RESULTS:";
pub const DONE_SENTINEL: &str = "DONE:";

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReport {
    Error(String),
    Empty,
    /// Everything after the `RESULTS:` sentinel.
    Results(String),
}

impl WorkerReport {
    /// Classify worker output; `None` when no sentinel is present.
    pub fn classify(output: &str) -> Option<WorkerReport> {
        if let Some((_, detail)) = output.split_once(ERROR_SENTINEL) {
            return Some(WorkerReport::Error(detail.trim().to_string()));
        }
        if output.contains(EMPTY_SENTINEL) {
            return Some(WorkerReport::Empty);
        }
        output
            .split_once(RESULTS_SENTINEL)
            .map(|(_, body)| WorkerReport::Results(body.to_string()))
    }
}

/// The fields of a `RESULTS:` body the orchestrator reads. Unknown keys are ignored.
///
/// `printing_area` and `dimensions` are taken over as written, whatever their shape.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkerAnalysis {
    #[serde(default)]
    pub printing_area: Option<Value>,
    #[serde(default)]
    pub dimensions: Option<Value>,
    #[serde(default)]
    pub print_time_secs: Option<f64>,
    /// mm³ of resin.
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub layer_count: Option<u32>,
    #[serde(default)]
    pub layer_height_mm: Option<f64>,
    #[serde(rename = "printer name", default)]
    pub printer_name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl WorkerAnalysis {
    pub fn parse(body: &str) -> Result<Self, AnalysisError> {
        serde_yaml::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))
    }

    /// Normalize into the host's metadata shape. Zero values count as unknown.
    pub fn into_result(self, job_path: &Path) -> AnalysisResult {
        let mut result = AnalysisResult::empty(self.path.unwrap_or_else(|| job_path.to_path_buf()));
        result.printing_area = self.printing_area;
        result.dimensions = self.dimensions;
        result.estimated_print_time = self.print_time_secs.filter(|secs| *secs != 0.0);
        if let Some(volume) = self.volume.filter(|volume| *volume != 0.0) {
            result.set_volume(volume);
        }
        result.layer_count = self.layer_count.filter(|count| *count != 0);
        result.layer_height_mm = self.layer_height_mm.filter(|height| *height != 0.0);
        result.printer_name = self.printer_name.filter(|name| !name.is_empty());
        result
    }
}

/// Read a complete worker report into a fresh (unmerged) result.
pub fn parse_output(output: &str, job_path: &Path) -> Result<AnalysisResult, AnalysisError> {
    match WorkerReport::classify(output) {
        Some(WorkerReport::Error(detail)) => Err(AnalysisError::Worker(detail)),
        Some(WorkerReport::Empty) => {
            tracing::info!("Result is empty, no layers found in {}", job_path.display());
            Ok(AnalysisResult::empty(job_path))
        }
        Some(WorkerReport::Results(body)) => Ok(WorkerAnalysis::parse(&body)?.into_result(job_path)),
        None => Err(AnalysisError::NoResult),
    }
}

/// Body written by the worker after `RESULTS:`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsReport {
    pub filename: String,
    pub path: PathBuf,
    pub bed_size_mm: [f64; 3],
    pub height_mm: f64,
    pub layer_count: u32,
    pub layer_height_mm: f64,
    pub resolution: [u32; 2],
    pub print_time_secs: f64,
    /// Minutes.
    pub total_time: f64,
    pub volume: f64,
    #[serde(rename = "printer name")]
    pub printer_name: String,
    pub printing_area: PrintingArea,
    pub dimensions: Dimensions,
}

pub fn render_error(detail: &str) -> String {
    format!("{} {}\n", ERROR_SENTINEL, detail)
}

pub fn render_empty(detail: &str) -> String {
    format!("{} {}\n", EMPTY_SENTINEL, detail)
}

pub fn render_results(elapsed: Duration, report: &ResultsReport) -> Result<String, serde_yaml::Error> {
    let body = serde_yaml::to_string(report)?;
    Ok(format!(
        "{}{:.3}s\n{}\n{}",
        DONE_SENTINEL,
        elapsed.as_secs_f64(),
        RESULTS_SENTINEL,
        body
    ))
}
