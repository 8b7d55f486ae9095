//! Normalized print metadata as stored in the host's per-file metadata record.
//!
//! Field names on the wire follow the host's metadata vocabulary
//! (`printingArea`, `estimatedPrintTime`, ...), so a stored record can be
//! read back as a prior analysis and merged with a fresh one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::MetadataStore;

/// Resin volume is reported as the length of this much 1.75 mm filament.
pub const NOMINAL_FILAMENT_DIAMETER_MM: f64 = 1.75;

/// A prior analysis carrying all of these keys is returned without re-analysis.
pub const CACHED_ANALYSIS_KEYS: [&str; 4] = ["printingArea", "dimensions", "estimatedPrintTime", "filament"];

/// Tool key used for the filament-equivalent entry.
pub const DEFAULT_TOOL: &str = "tool0";

pub const FALLBACK_PRINTER_NAME: &str = "Unknown SLA Printer";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintingArea {
    pub min_x: f64,
    pub min_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_z: Option<f64>,
    pub max_x: f64,
    pub max_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_z: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub depth: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilamentUsage {
    pub length: f64,
    pub volume: f64,
}

impl FilamentUsage {
    /// Filament-equivalent length for a resin volume in mm³.
    pub fn from_volume(volume: f64) -> Self {
        let radius = NOMINAL_FILAMENT_DIAMETER_MM / 2.0;
        Self {
            length: volume / (PI * radius * radius),
            volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Kept as the worker or the host wrote it, usually a [`PrintingArea`] mapping.
    #[serde(rename = "printingArea", default, skip_serializing_if = "Option::is_none")]
    pub printing_area: Option<Value>,
    /// Kept as given, usually a [`Dimensions`] mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Value>,
    /// Seconds.
    #[serde(rename = "estimatedPrintTime", default, skip_serializing_if = "Option::is_none")]
    pub estimated_print_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filament: Option<BTreeMap<String, FilamentUsage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_height_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_name: Option<String>,
    pub path: PathBuf,
    /// Keys the host stored that this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    /// A result that knows nothing beyond the file it belongs to.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            printing_area: None,
            dimensions: None,
            estimated_print_time: None,
            filament: None,
            layer_count: None,
            layer_height_mm: None,
            printer_name: None,
            path: path.into(),
            extra: Map::new(),
        }
    }

    /// Fixed record returned whenever analysis fails, so the file stays usable.
    pub fn fallback(path: impl Into<PathBuf>) -> Self {
        Self {
            printing_area: Some(json!({"minX": 0.0, "minY": 0.0, "maxX": 100.0, "maxY": 100.0})),
            dimensions: Some(json!({"width": 100.0, "depth": 100.0, "height": 50.0})),
            estimated_print_time: Some(3600.0),
            filament: Some(BTreeMap::from([(
                DEFAULT_TOOL.to_string(),
                FilamentUsage {
                    length: 100.0,
                    volume: 10.0,
                },
            )])),
            layer_count: Some(100),
            layer_height_mm: Some(0.05),
            printer_name: Some(FALLBACK_PRINTER_NAME.to_string()),
            path: path.into(),
            extra: Map::new(),
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.filament = Some(BTreeMap::from([(DEFAULT_TOOL.to_string(), FilamentUsage::from_volume(volume))]));
    }

    /// Overlay `prior` on top of this result; prior values win on conflicts.
    pub fn merge_prior(self, prior: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut merged = serde_json::to_value(self)?;
        deep_merge(&mut merged, &Value::Object(prior.clone()));
        serde_json::from_value(merged)
    }

    pub fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// True when `prior` can be returned as is. Only key presence counts, not the shape of the values.
pub fn has_cached_analysis(prior: &Map<String, Value>) -> bool {
    CACHED_ANALYSIS_KEYS.iter().all(|key| prior.contains_key(*key))
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// In-memory metadata store for the CLI and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    records: Arc<Mutex<HashMap<PathBuf, Map<String, Value>>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, record: Map<String, Value>) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(path.into(), record);
        }
    }

    pub fn get(&self, path: &Path) -> Option<Map<String, Value>> {
        self.records.lock().ok().and_then(|records| records.get(path).cloned())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load(&self, path: &Path) -> Option<Map<String, Value>> {
        self.get(path)
    }

    async fn save(&self, path: &Path, result: &AnalysisResult) {
        match result.to_map() {
            Ok(record) => self.insert(path, record),
            Err(e) => tracing::warn!("Failed to store analysis for {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filament_from_volume() {
        let usage = FilamentUsage::from_volume(100.0);
        let expected = 100.0 / (PI * 0.875 * 0.875);
        assert!((usage.length - expected).abs() < 1e-9);
        assert_eq!(usage.volume, 100.0);
    }

    #[test]
    fn test_serialized_keys_use_host_names() {
        let value = serde_json::to_value(AnalysisResult::fallback("/prints/a.ctb")).unwrap();
        assert_eq!(value["printingArea"]["maxX"], json!(100.0));
        assert!(value["printingArea"].get("minZ").is_none());
        assert_eq!(value["estimatedPrintTime"], json!(3600.0));
        assert_eq!(value["filament"]["tool0"]["length"], json!(100.0));
        assert_eq!(value["printer_name"], json!("Unknown SLA Printer"));
        assert_eq!(value["path"], json!("/prints/a.ctb"));
    }

    #[test]
    fn test_merge_prior_wins_and_keeps_nested_fields() {
        let mut fresh = AnalysisResult::empty("/prints/a.ctb");
        fresh.dimensions = Some(json!({"width": 1.0, "depth": 2.0, "height": 3.0}));
        fresh.layer_count = Some(10);
        let prior = json!({
            "dimensions": {"height": 9.0},
            "printer_name": "Edited",
            "notes": "keep me",
        });
        let merged = fresh.merge_prior(prior.as_object().unwrap()).unwrap();
        assert_eq!(merged.dimensions, Some(json!({"width": 1.0, "depth": 2.0, "height": 9.0})));
        assert_eq!(merged.layer_count, Some(10));
        assert_eq!(merged.printer_name.as_deref(), Some("Edited"));
        assert_eq!(merged.extra.get("notes"), Some(&json!("keep me")));
    }

    #[test]
    fn test_merge_prior_type_mismatch_is_an_error() {
        let fresh = AnalysisResult::empty("/prints/a.ctb");
        let prior = json!({"layer_count": "many"});
        assert!(fresh.merge_prior(prior.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_cached_analysis_needs_keys_not_shapes() {
        let partial = json!({"printingArea": {}, "dimensions": {}});
        assert!(!has_cached_analysis(partial.as_object().unwrap()));

        let loose = json!({"printingArea": {}, "dimensions": {}, "estimatedPrintTime": 42, "filament": {}});
        assert!(has_cached_analysis(loose.as_object().unwrap()));
    }

    #[test]
    fn test_merge_keeps_partial_area() {
        let mut fresh = AnalysisResult::empty("/prints/a.ctb");
        fresh.layer_count = Some(10);
        let prior = json!({"printingArea": {}, "dimensions": {"height": 2.0}});
        let merged = fresh.merge_prior(prior.as_object().unwrap()).unwrap();
        assert_eq!(merged.printing_area, Some(json!({})));
        assert_eq!(merged.dimensions, Some(json!({"height": 2.0})));
        assert_eq!(merged.layer_count, Some(10));
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryMetadataStore::new();
        let path = Path::new("/prints/a.ctb");
        assert!(store.load(path).await.is_none());
        store.save(path, &AnalysisResult::fallback(path)).await;
        let record = store.load(path).await.unwrap();
        assert!(has_cached_analysis(&record));
    }
}
