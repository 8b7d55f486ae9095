//! Shared configuration for the serial bridge, the analysis queue and the worker.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub additional_ports: Vec<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Sent right after the port opens; the board answers with its identifier.
    #[serde(default = "default_hello_command")]
    pub hello_command: String,
    #[serde(default = "default_pause_command")]
    pub pause_command: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            additional_ports: Vec::new(),
            baud: default_baud(),
            hello_command: default_hello_command(),
            pause_command: default_pause_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesConfig {
    /// Comma separated, whitespace is ignored.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            upload_dir: default_upload_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Worker executable. `None` means the running binary re-invokes itself.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            worker_program: None,
            worker_args: default_worker_args(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AnalysisConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid("serial baud must be > 0".to_string()));
        }
        if self.analysis.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("analysis poll_interval_ms must be > 0".to_string()));
        }
        if self.analysis.max_poll_interval_ms < self.analysis.poll_interval_ms {
            return Err(ConfigError::Invalid(
                "analysis max_poll_interval_ms must be >= poll_interval_ms".to_string(),
            ));
        }
        if self.files.allowed_extensions.split(',').all(|ext| ext.trim().is_empty()) {
            return Err(ConfigError::Invalid("files allowed_extensions is empty".to_string()));
        }
        Ok(())
    }
}

fn default_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_hello_command() -> String { "M4002".to_string() }
fn default_pause_command() -> String { "M25".to_string() }
fn default_allowed_extensions() -> String { "cbddlp, photon, ctb, fdg, pws, pw0, pwms, pwmx".to_string() }
fn default_upload_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_worker_args() -> Vec<String> { vec!["sla-analysis".to_string()] }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_max_poll_interval_ms() -> u64 { 250 }
fn default_timeout_secs() -> u64 { 300 }

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!("Config file '{}' not found, using defaults", path.display());
        return Ok(Config::default());
    }
    load_config(path)
}
