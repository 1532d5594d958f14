//! Config document read/write
//!
//! One JSON document per scheduler, loaded once at construction and
//! overwritten wholesale on explicit persist requests.

use crate::utils::AppResult;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory for per-object config documents
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".pi_monitor")
        .join("config")
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `<dir>/<name>.json`
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{}.json", name)))
    }

    /// Read the stored document, `None` if nothing has been saved yet
    pub fn load(&self) -> AppResult<Option<Value>> {
        if !self.path.exists() {
            tracing::debug!("No config found in {:?}, using defaults", self.path);
            return Ok(None);
        }

        tracing::debug!("Loading config from {:?}", self.path);
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save<T: Serialize>(&self, document: &T) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, content)?;

        tracing::debug!("Saved config to {:?}", self.path);
        Ok(())
    }
}
