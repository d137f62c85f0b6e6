//! Application settings, stored as TOML under the user config directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::session::ViewOptions;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    /// Executable implementing the host side of the bridge.
    pub host_command: String,
    pub host_args: Vec<String>,
    pub log_level: String,
    pub scrollback_lines: usize,
    /// Cap on the per-session replayable output log, bytes.
    pub history_cap_bytes: usize,
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_command: "termlink-host".to_string(),
            host_args: Vec::new(),
            log_level: "info".to_string(),
            scrollback_lines: 10_000,
            history_cap_bytes: 1 << 20,
            tick_interval_ms: 40,
        }
    }
}

impl Settings {
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| AppError::ConfigError("cannot determine config directory".into()))?;
        Ok(dir.join("termlink").join("config.toml"))
    }

    /// Read the settings file, writing a default one on first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| {
                AppError::ConfigError(format!("invalid config {}: {e}", path.display()))
            })
        } else {
            let settings = Self::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let raw = toml::to_string_pretty(&settings)
                .map_err(|e| AppError::ConfigError(e.to_string()))?;
            fs::write(path, raw)?;
            Ok(settings)
        }
    }

    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            scrollback_lines: self.scrollback_lines,
            history_cap: self.history_cap_bytes,
        }
    }
}
