use crate::utils::error::{ArcflowError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Engine tunables. Loaded from the user's TOML config when present;
/// every field falls back to its default so partial files are fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Block size for content streaming during extraction.
    pub buffer_size: usize,
    /// Descend into subdirectories during the write crawl.
    pub recursive: bool,
    /// Log and skip unreadable directories instead of aborting the crawl.
    pub tolerate_walk_errors: bool,
    /// Surface directories found during the crawl as their own archive
    /// entries (including ones left empty by filtering).
    pub emit_directories: bool,
    /// Re-apply archived permission bits after extracting a file.
    pub preserve_permissions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            recursive: true,
            tolerate_walk_errors: false,
            emit_directories: true,
            preserve_permissions: true,
        }
    }
}

impl EngineConfig {
    /// Reads a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ArcflowError::Config(e.to_string()))
    }

    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).map_err(|e| ArcflowError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("arcflow").join("config.toml"))
    }
}
