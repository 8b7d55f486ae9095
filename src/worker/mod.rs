//! The `sla-analysis` side of the analysis protocol.
//!
//! Runs in its own process, decodes one sliced file and prints a report
//! the orchestrator understands. It never fails with a non-zero exit: every
//! problem becomes an `ERROR:` report.

pub mod decoder;

pub use decoder::{DecodeError, DecoderRegistry, SlicedFileDecoder, SlicedModelFile};

use std::path::Path;
use std::time::Instant;

use crate::analysis::protocol::{ResultsReport, render_empty, render_error, render_results};

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl ResultsReport {
    pub fn from_model(path: &Path, model: &SlicedModelFile) -> Self {
        Self {
            filename: model.filename.clone(),
            path: path.to_path_buf(),
            bed_size_mm: model.bed_size_mm,
            height_mm: round_to(model.height_mm, 4),
            layer_count: model.layer_count,
            layer_height_mm: round_to(model.layer_height_mm, 4),
            resolution: model.resolution,
            print_time_secs: model.print_time_secs,
            total_time: model.print_time_secs / 60.0,
            volume: model.volume,
            printer_name: model.printer_name.clone(),
            printing_area: model.printing_area,
            dimensions: model.dimensions,
        }
    }
}

/// Analyse `path` and return the full report text.
pub fn run_worker(path: &Path, registry: &DecoderRegistry) -> String {
    let started = Instant::now();
    if !path.is_absolute() {
        return render_error("not absolute path, nothing to analyse");
    }

    let model = match registry.decode(path) {
        Ok(model) => model,
        Err(e) => {
            tracing::warn!("Failed to decode {}: {}", path.display(), e);
            return render_error(&e.to_string());
        }
    };
    if model.layer_count == 0 {
        return render_empty("no layers found");
    }

    let report = ResultsReport::from_model(path, &model);
    match render_results(started.elapsed(), &report) {
        Ok(text) => text,
        Err(e) => render_error(&e.to_string()),
    }
}
