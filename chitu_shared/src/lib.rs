// chitu_shared: shared types for the serial bridge, the analysis queue and the worker

pub mod analysis_job;
pub mod config;
pub mod file_manager;
pub mod host_interface;
pub mod metadata;

pub use analysis_job::{AnalysisError, AnalysisJob, AnalysisOutcome, JobControl};
pub use host_interface::{HostEvent, HostState, HostStatus, PrinterHost};
pub use metadata::{AnalysisResult, Dimensions, FilamentUsage, InMemoryMetadataStore, PrintingArea};

// --- Shared Traits ---

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

/// Host-managed per-file metadata records.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn load(&self, path: &Path) -> Option<Map<String, Value>>;
    async fn save(&self, path: &Path, result: &AnalysisResult);
}
