// Sliced-file discovery and the extension registry for resin print files
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;

/// Content type every recognized slicer file maps to.
pub const SLA_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error, Clone)]
pub enum FileManagerError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

/// Recognized slicer extensions, stored lowercase without the leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRegistry {
    extensions: BTreeSet<String>,
}

impl ExtensionRegistry {
    /// Parse a comma separated list such as `"cbddlp, photon, ctb"`.
    pub fn parse(list: &str) -> Self {
        let extensions = list
            .split(',')
            .map(|ext| ext.split_whitespace().collect::<String>())
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.trim_start_matches('.').to_ascii_lowercase())
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.contains(ext))
            .unwrap_or(false)
    }

    /// Content type for `path`, or `None` when the extension is not registered.
    pub fn content_type(&self, path: &Path) -> Option<&'static str> {
        self.matches(path).then_some(SLA_CONTENT_TYPE)
    }
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct FileManager {
    registry: ExtensionRegistry,
}

impl FileManager {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// List the recognized slicer files directly inside `dir`, sorted by name.
    pub async fn list_sla_files(&self, dir: &Path) -> Result<Vec<FileInfo>, FileManagerError> {
        let metadata = fs::metadata(dir).await.map_err(|e| FileManagerError::Io(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(FileManagerError::NotADirectory(dir.display().to_string()));
        }
        let mut entries = fs::read_dir(dir).await.map_err(|e| FileManagerError::Io(e.to_string()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| FileManagerError::Io(e.to_string()))? {
            let path = entry.path();
            if !self.registry.matches(&path) {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|e| FileManagerError::Io(e.to_string()))?;
            if metadata.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let modified = match metadata.modified() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Failed to get modified time for '{}': {}", name, e);
                    SystemTime::UNIX_EPOCH
                }
            };
            files.push(FileInfo {
                name,
                path,
                size: metadata.len(),
                modified,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!("Found {} slicer files in {}", files.len(), dir.display());
        Ok(files)
    }
}
