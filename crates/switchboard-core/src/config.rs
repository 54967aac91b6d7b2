//! Orchestrator settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::{LoaderConfig, DEFAULT_NOT_FOUND_MARKERS};

pub const DEFAULT_LOAD_ERROR: &str = "Failed to load session history";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Every field is optional in the JSON form; missing ones take the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// User-facing text published when a history load fails.
    pub load_error_message: String,

    /// Case-insensitive substrings that mark a backend error as "no such
    /// session".
    pub not_found_markers: Vec<String>,

    /// Where raw live traffic is written, one file per session.
    pub log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            load_error_message: DEFAULT_LOAD_ERROR.to_string(),
            not_found_markers: DEFAULT_NOT_FOUND_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            log_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            not_found_markers: self.not_found_markers.clone(),
        }
    }
}
