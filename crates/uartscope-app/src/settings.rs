use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uartscope_core::logbuf::DEFAULT_RX_LOG_ENTRIES;
use uartscope_core::SessionConfig;

const APP_DIR: &str = "uartscope";
const SETTINGS_FILE: &str = "settings.json";

/// Persisted defaults for the command-line front end. Flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session: SessionConfig,
    /// Name accepted by `TextEncoding::from_str`.
    pub encoding: String,
    pub show_hex: bool,
    pub show_scope: bool,
    pub rx_log_entries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            encoding: "auto".to_string(),
            show_hex: false,
            show_scope: false,
            rx_log_entries: DEFAULT_RX_LOG_ENTRIES,
        }
    }
}

impl Settings {
    /// `<config dir>/uartscope/settings.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Reads `path`, falling back to defaults when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        log::info!("settings saved to {}", path.display());
        Ok(())
    }
}
