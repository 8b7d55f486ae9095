use std::path::Path;

use chitu_rs::analysis::{WorkerReport, parse_output};
use chitu_rs::worker::{DecodeError, DecoderRegistry, SlicedFileDecoder, SlicedModelFile, run_worker};
use chitu_shared::{AnalysisError, Dimensions, PrintingArea};

/// Decoder returning canned data, keyed by file stem.
struct CannedDecoder;

impl SlicedFileDecoder for CannedDecoder {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn extensions(&self) -> &[&'static str] {
        &["ctb"]
    }

    fn decode(&self, path: &Path) -> Result<SlicedModelFile, DecodeError> {
        match path.file_stem().and_then(|s| s.to_str()) {
            Some("broken") => Err(DecodeError::Invalid("bad header".to_string())),
            Some("hollow") => Ok(SlicedModelFile::default()),
            _ => Ok(SlicedModelFile {
                filename: "cube.ctb".to_string(),
                bed_size_mm: [68.04, 120.96, 150.0],
                height_mm: 20.000001,
                layer_count: 400,
                layer_height_mm: 0.050000001,
                resolution: [1440, 2560],
                print_time_secs: 3600.0,
                volume: 12345.5,
                printer_name: "Mars 2 Pro".to_string(),
                printing_area: PrintingArea {
                    min_x: 4.0,
                    min_y: 8.0,
                    min_z: Some(0.0),
                    max_x: 24.0,
                    max_y: 28.0,
                    max_z: Some(20.0),
                },
                dimensions: Dimensions {
                    width: 20.0,
                    depth: 20.0,
                    height: 20.0,
                },
            }),
        }
    }
}

fn registry() -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();
    registry.register(Box::new(CannedDecoder));
    registry
}

#[test]
fn test_relative_path_reported() {
    let output = run_worker(Path::new("prints/cube.ctb"), &registry());
    assert_eq!(output, "ERROR: not absolute path, nothing to analyse\n");
}

#[test]
fn test_unknown_format_reported() {
    let output = run_worker(Path::new("/prints/cube.stl"), &registry());
    assert!(output.starts_with("ERROR: unsupported file format"));
    assert!(matches!(
        parse_output(&output, Path::new("/prints/cube.stl")),
        Err(AnalysisError::Worker(_))
    ));
}

#[test]
fn test_decoder_failure_reported() {
    let output = run_worker(Path::new("/prints/broken.ctb"), &registry());
    assert_eq!(
        WorkerReport::classify(&output),
        Some(WorkerReport::Error("invalid sliced file: bad header".to_string()))
    );
}

#[test]
fn test_no_layers_is_empty() {
    let output = run_worker(Path::new("/prints/hollow.ctb"), &registry());
    assert_eq!(output, "EMPTY: no layers found\n");
}

#[test]
fn test_report_readable_by_orchestrator() {
    let path = Path::new("/prints/cube.ctb");
    let output = run_worker(path, &registry());
    assert!(output.starts_with("DONE:"));
    assert!(output.contains("\nRESULTS:\n"));
    assert!(output.contains("printer name: Mars 2 Pro"));
    assert!(output.contains("total_time: 60.0"));
    assert!(output.contains("height_mm: 20.0\n"));
    assert!(output.contains("layer_height_mm: 0.05\n"));

    let result = parse_output(&output, Path::new("/elsewhere/cube.ctb")).unwrap();
    assert_eq!(result.path, path);
    assert_eq!(result.layer_count, Some(400));
    assert_eq!(result.estimated_print_time, Some(3600.0));
    assert_eq!(result.printing_area.unwrap()["maxZ"], serde_json::json!(20.0));
    assert_eq!(result.filament.unwrap()["tool0"].volume, 12345.5);
}

#[test]
fn test_sentinel_priority() {
    assert_eq!(
        WorkerReport::classify("RESULTS:\nEMPTY: nope\nERROR: boom"),
        Some(WorkerReport::Error("boom".to_string()))
    );
    assert_eq!(WorkerReport::classify("EMPTY: x\nRESULTS:\n"), Some(WorkerReport::Empty));
    assert_eq!(WorkerReport::classify("nothing here"), None);
}

#[test]
fn test_built_in_worker_exits_cleanly() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_chitu-host"))
        .args(["sla-analysis", "relative.ctb"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "ERROR: not absolute path, nothing to analyse\n"
    );
}
