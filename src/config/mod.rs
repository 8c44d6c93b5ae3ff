//! Persistent settings and application state
//!
//! Two files live in the platform data directory:
//!
//! - `settings.toml` ([`ScannerSettings`]): scan engine and dataset tuning
//! - `app_state.json` ([`AppState`]): recently used configuration files and
//!   the saved variables restored at startup
//!
//! Both fall back to defaults when missing or unreadable.
//!
//! # Example
//!
//! ```ignore
//! use scanlab::config::{AppState, ScannerSettings};
//!
//! let settings = ScannerSettings::load_or_default();
//! let mut state = AppState::load_or_default();
//! state.add_recent_config("scan.scanconf");
//! state.save()?;
//! ```

use crate::error::{Result, ResultExt, ScanError};
use crate::scan::{ScanOptions, DEFAULT_QUEUE_CAPACITY};
use crate::types::Value;
use crate::variables::VariableStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for the data directory
pub const APP_ID: &str = "scanlab";

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.toml";

/// Application state file name
pub const APP_STATE_FILE: &str = "app_state.json";

/// Extension of recipe configuration files
pub const CONFIG_EXTENSION: &str = "scanconf";

/// Maximum number of recent configuration files to remember
pub const MAX_RECENT_CONFIGS: usize = 10;

/// Get the application data directory
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        ScanError::InvalidConfiguration("Could not determine app data directory".to_string())
    })?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create app data directory {:?}", dir))?;
    Ok(dir)
}

// ==================== Scanner Settings ====================

/// Scan engine and dataset settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Significant digits of float values in exported configurations
    pub precision: usize,

    /// Persist datasets to a run folder while scanning
    pub save_temp: bool,

    /// Write the run configuration next to exported data
    pub save_config: bool,

    /// Root of run folders (defaults to `<data dir>/scans`)
    pub data_root: Option<PathBuf>,

    /// Capacity of the result queue between worker and consumer
    pub queue_capacity: usize,

    /// Polling interval of a paused worker in milliseconds
    pub pause_poll_ms: u64,

    /// Queue push retry interval in milliseconds
    pub send_timeout_ms: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            precision: crate::recipe::DEFAULT_PRECISION,
            save_temp: false,
            save_config: true,
            data_root: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pause_poll_ms: 20,
            send_timeout_ms: 50,
        }
    }
}

impl ScannerSettings {
    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(SETTINGS_FILE))
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {:?}", path))?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the data directory, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write settings {:?}", path))
    }

    /// Save settings to the data directory
    pub fn save_default(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save(dir.join(SETTINGS_FILE))
    }

    /// Root of run folders
    pub fn resolved_data_root(&self) -> Option<PathBuf> {
        self.data_root
            .clone()
            .or_else(|| app_data_dir().map(|p| p.join("scans")))
    }

    /// Engine options derived from these settings
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            queue_capacity: self.queue_capacity.max(1),
            pause_poll: Duration::from_millis(self.pause_poll_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

// ==================== App State ====================

/// State remembered between sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    /// Recently used configuration files, most recent first
    pub recent_configs: Vec<PathBuf>,

    /// Saved variables as `name -> raw text`
    pub variables: BTreeMap<String, String>,
}

impl AppState {
    /// Default state file path
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(APP_STATE_FILE))
    }

    /// Load state from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read app state {:?}", path))?;
        serde_json::from_str(&content)
            .map_err(|e| ScanError::Serialization(format!("Failed to parse app state: {}", e)))
    }

    /// Load state from the data directory, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save state as JSON
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::Serialization(format!("Failed to serialize app state: {}", e)))?;
        std::fs::write(path, content).with_context(|| format!("Failed to write app state {:?}", path))
    }

    /// Save state to the data directory
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(APP_STATE_FILE))
    }

    /// Move `path` to the front of the recent list
    pub fn add_recent_config(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.recent_configs.retain(|p| p != &path);
        self.recent_configs.insert(0, path);
        self.recent_configs.truncate(MAX_RECENT_CONFIGS);
    }

    /// Drop recent entries whose file no longer exists
    pub fn cleanup_missing_configs(&mut self) {
        self.recent_configs.retain(|p| p.exists());
    }

    /// Record the raw value of every variable in `store`
    pub fn capture_variables(&mut self, store: &VariableStore) {
        self.variables = store
            .list()
            .into_iter()
            .filter_map(|name| {
                let variable = store.get(name).ok()?;
                Some((name.to_string(), variable.raw().to_string()))
            })
            .collect();
    }

    /// Set the saved variables in `store`
    pub fn restore_variables(&self, store: &mut VariableStore) -> Result<()> {
        store.load_pairs(
            self.variables
                .iter()
                .map(|(name, raw)| (name.as_str(), Value::parse_literal(raw))),
        )
    }
}
