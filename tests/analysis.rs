#![cfg(unix)]

use serde_json::{Map, Value, json};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use chitu_rs::analysis::{AnalysisOrchestrator, PollPolicy, WorkerCommand};
use chitu_shared::{AnalysisError, AnalysisJob, AnalysisOutcome, AnalysisResult};

const RESULTS_SCRIPT: &str = r#"cat <<EOF
DONE:0.042s
RESULTS:
filename: cube.ctb
path: $1
printing_area:
  minX: 10.0
  minY: 12.5
  maxX: 60.0
  maxY: 70.0
dimensions:
  width: 50.0
  depth: 57.5
  height: 20.0
print_time_secs: 1800.0
total_time: 30.0
volume: 100.0
layer_count: 400
layer_height_mm: 0.05
printer name: Mars 3
EOF
"#;

fn fast_policy() -> PollPolicy {
    PollPolicy {
        initial: Duration::from_millis(5),
        max: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
    }
}

fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    path
}

fn scripted(dir: &TempDir, body: &str) -> AnalysisOrchestrator {
    let script = write_script(dir, body);
    AnalysisOrchestrator::new(WorkerCommand::new("sh", [script.display().to_string()]), fast_policy())
}

fn missing_worker() -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(
        WorkerCommand::new("/nonexistent/chitu-worker", ["sla-analysis"]),
        fast_policy(),
    )
}

fn job(dir: &TempDir) -> AnalysisJob {
    let path = dir.path().join("cube.ctb");
    std::fs::write(&path, b"sliced").unwrap();
    AnalysisJob::new(1, path).unwrap()
}

fn completed(outcome: AnalysisOutcome) -> AnalysisResult {
    match outcome {
        AnalysisOutcome::Completed(result) => result,
        other => panic!("expected a result, got {:?}", other),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

#[tokio::test]
async fn test_cached_analysis_skips_worker() {
    let dir = TempDir::new().unwrap();
    let prior = object(json!({
        "printingArea": {"minX": 0.0, "minY": 0.0, "maxX": 80.0, "maxY": 120.0},
        "dimensions": {"width": 80.0, "depth": 120.0, "height": 40.0},
        "estimatedPrintTime": 42.0,
        "filament": {"tool0": {"length": 1.0, "volume": 2.0}},
        "notes": "edited by hand"
    }));
    let job = job(&dir).with_prior_analysis(prior.clone());

    // A launch attempt would fail and produce the fallback record instead.
    let outcome = missing_worker().analyze(&job).await;
    assert_eq!(outcome, AnalysisOutcome::Cached(prior));
}

#[tokio::test]
async fn test_loosely_shaped_cache_returned_unchanged() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("launched");
    let orchestrator = scripted(&dir, &format!("touch '{}'\n{}", marker.display(), RESULTS_SCRIPT));
    let prior = object(json!({
        "printingArea": {},
        "dimensions": {},
        "estimatedPrintTime": 42,
        "filament": {}
    }));
    let job = job(&dir).with_prior_analysis(prior.clone());

    let outcome = orchestrator.analyze(&job).await;
    assert_eq!(outcome, AnalysisOutcome::Cached(prior.clone()));
    assert!(!marker.exists());
    assert_eq!(outcome.to_record().unwrap(), Some(prior));
}

#[tokio::test]
async fn test_launch_failure_falls_back() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let result = completed(missing_worker().analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
}

#[tokio::test]
async fn test_unparsable_output_falls_back() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "echo 'segmentation fault (core dumped)'\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
    assert_eq!(result.layer_count, Some(100));
    assert_eq!(result.printer_name.as_deref(), Some("Unknown SLA Printer"));
}

#[tokio::test]
async fn test_worker_error_falls_back() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "echo 'ERROR: unsupported file format'\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
}

#[tokio::test]
async fn test_malformed_results_fall_back() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "printf 'RESULTS:\\nlayer_count: [unterminated\\n'\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
}

#[tokio::test]
async fn test_empty_report_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "echo 'EMPTY: no layers found'\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::empty(job.path()));
}

#[tokio::test]
async fn test_results_are_normalized() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, RESULTS_SCRIPT);
    let result = completed(orchestrator.analyze(&job).await);

    assert_eq!(
        result.printing_area,
        Some(json!({"minX": 10.0, "minY": 12.5, "maxX": 60.0, "maxY": 70.0}))
    );
    assert_eq!(result.dimensions.unwrap()["depth"], json!(57.5));
    assert_eq!(result.estimated_print_time, Some(1800.0));
    assert_eq!(result.layer_count, Some(400));
    assert_eq!(result.layer_height_mm, Some(0.05));
    assert_eq!(result.printer_name.as_deref(), Some("Mars 3"));
    assert_eq!(result.path, job.path());

    let filament = result.filament.unwrap();
    let tool = filament.get("tool0").unwrap();
    assert_eq!(tool.volume, 100.0);
    assert!((tool.length - 100.0 / (PI * 0.875 * 0.875)).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_path_defaults_to_job() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "printf 'RESULTS:\\nlayer_count: 3\\nvolume: 0\\n'\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result.path, job.path());
    assert_eq!(result.layer_count, Some(3));
    assert!(result.filament.is_none());
    assert!(result.estimated_print_time.is_none());
}

#[tokio::test]
async fn test_prior_analysis_wins_on_merge() {
    let dir = TempDir::new().unwrap();
    let prior = object(json!({
        "estimatedPrintTime": 99.0,
        "dimensions": {"height": 21.0},
        "notes": "keep me"
    }));
    let job = job(&dir).with_prior_analysis(prior);
    let orchestrator = scripted(&dir, RESULTS_SCRIPT);
    let result = completed(orchestrator.analyze(&job).await);

    assert_eq!(result.estimated_print_time, Some(99.0));
    let dimensions = result.dimensions.unwrap();
    assert_eq!((&dimensions["width"], &dimensions["height"]), (&json!(50.0), &json!(21.0)));
    assert_eq!(result.layer_count, Some(400));
    assert_eq!(result.extra.get("notes"), Some(&json!("keep me")));
}

#[tokio::test]
async fn test_stderr_kept_out_of_report() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(
        &dir,
        "printf 'RESULTS:\\nlayer_count: 400\\nvolume: 100\\n'\necho 'WARN low resin' >&2\n",
    );
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result.layer_count, Some(400));
    assert_eq!(result.filament.unwrap()["tool0"].volume, 100.0);
    assert_eq!(result.printer_name, None);
}

#[tokio::test]
async fn test_report_on_stderr_is_ignored() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(&dir, "echo 'EMPTY: no layers found' >&2\n");
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
}

#[tokio::test]
async fn test_partial_area_copied_as_reported() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = scripted(
        &dir,
        "printf 'RESULTS:\\nprinting_area: {minX: 1.0, maxX: 2.0}\\nlayer_count: 400\\nprint_time_secs: 90\\n'\n",
    );
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result.printing_area, Some(json!({"minX": 1.0, "maxX": 2.0})));
    assert_eq!(result.layer_count, Some(400));
    assert_eq!(result.estimated_print_time, Some(90.0));
    assert_eq!(result.printer_name, None);
}

#[tokio::test]
async fn test_abort_with_reenqueue() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = Arc::new(scripted(&dir, &format!("sleep 5\n{}", RESULTS_SCRIPT)));
    assert!(!orchestrator.abort(true));

    let running = orchestrator.clone();
    let handle = tokio::spawn(async move { running.analyze(&job).await });
    while !orchestrator.is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(orchestrator.abort(true));

    let outcome = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("abort should stop the worker")
        .unwrap();
    assert_eq!(outcome, AnalysisOutcome::Aborted { reenqueue: true });
    assert!(!orchestrator.is_busy());
}

#[tokio::test]
async fn test_abort_before_launch() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    job.abort(false);
    let outcome = missing_worker().analyze(&job).await;
    assert_eq!(outcome, AnalysisOutcome::Aborted { reenqueue: false });
}

#[tokio::test]
async fn test_timeout_falls_back() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let script = write_script(&dir, "sleep 5\n");
    let orchestrator = AnalysisOrchestrator::new(
        WorkerCommand::new("sh", [script.display().to_string()]),
        PollPolicy {
            timeout: Duration::from_millis(200),
            ..fast_policy()
        },
    );
    let result = tokio::time::timeout(Duration::from_secs(3), orchestrator.analyze(&job))
        .await
        .expect("timeout should kill the worker");
    assert_eq!(completed(result), AnalysisResult::fallback(job.path()));
}

#[test]
fn test_relative_path_never_launches() {
    let command = WorkerCommand::new("sh", ["worker.sh"]);
    let err = command.invocation(Path::new("prints/cube.ctb")).unwrap_err();
    assert!(matches!(err, AnalysisError::RelativePath(_)));

    let invocation = command.invocation(Path::new("/prints/cube.ctb")).unwrap();
    assert_eq!(invocation.to_string(), "sh worker.sh /prints/cube.ctb");
}

#[tokio::test]
async fn test_built_in_worker_without_decoders() {
    let dir = TempDir::new().unwrap();
    let job = job(&dir);
    let orchestrator = AnalysisOrchestrator::new(
        WorkerCommand::new(env!("CARGO_BIN_EXE_chitu-host"), ["sla-analysis"]),
        fast_policy(),
    );
    let result = completed(orchestrator.analyze(&job).await);
    assert_eq!(result, AnalysisResult::fallback(job.path()));
}
