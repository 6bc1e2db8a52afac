use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine configuration. Loaded once by the caller and passed into every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Hidden sheet created by data-sheet migration.
    pub data_sheet_name: String,
    /// Column holding each row's primary key.
    pub pk_name: String,
    /// Sheets that reject every mutation.
    pub read_only_sheets: Vec<String>,
    /// Sheets left out of metadata discovery.
    pub ignore_sheets: Vec<String>,
    /// Carried for the surrounding application; the engine itself never polls.
    pub auto_refresh_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_sheet_name: "_data".to_string(),
            pk_name: "id".to_string(),
            read_only_sheets: Vec::new(),
            ignore_sheets: Vec::new(),
            auto_refresh_seconds: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn is_read_only(&self, sheet: &str) -> bool {
        self.read_only_sheets.iter().any(|s| s == sheet)
    }

    pub fn is_ignored(&self, sheet: &str) -> bool {
        self.ignore_sheets.iter().any(|s| s == sheet)
    }
}
