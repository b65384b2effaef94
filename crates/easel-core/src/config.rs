//! Editor configuration.

use crate::document::{CanvasSettings, DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH, valid_size};
use crate::history::HISTORY_DEBOUNCE_MS;
use crate::library::MAX_VERSIONS_PER_DOCUMENT;
use crate::scene::SerializableColor;
use crate::snap::SNAP_THRESHOLD;
use crate::storage::{DEFAULT_AUTOSAVE_INTERVAL_SECS, DRAFT_DEBOUNCE_MS};
use crate::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables for a document session. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Snap distance in screen pixels at 100% zoom.
    pub snap_threshold: f64,
    pub history_debounce_ms: u64,
    pub autosave_interval_secs: u64,
    pub draft_debounce_ms: u64,
    pub max_versions: usize,
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub background_color: String,
    /// Where native storage lives; the platform data directory if unset.
    pub storage_dir: Option<PathBuf>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            snap_threshold: SNAP_THRESHOLD,
            history_debounce_ms: HISTORY_DEBOUNCE_MS,
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            draft_debounce_ms: DRAFT_DEBOUNCE_MS,
            max_versions: MAX_VERSIONS_PER_DOCUMENT,
            canvas_width: DEFAULT_CANVAS_WIDTH,
            canvas_height: DEFAULT_CANVAS_HEIGHT,
            background_color: SerializableColor::white().to_hex(),
            storage_dir: None,
        }
    }
}

impl EditorConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: EditorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.snap_threshold.is_finite() || self.snap_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "snap_threshold must be a non-negative number, got {}",
                self.snap_threshold
            )));
        }
        if self.autosave_interval_secs == 0 {
            return Err(ConfigError::Invalid("autosave_interval_secs must be positive".into()));
        }
        if self.max_versions == 0 {
            return Err(ConfigError::Invalid("max_versions must be positive".into()));
        }
        if !valid_size(self.canvas_width, self.canvas_height) {
            return Err(ConfigError::Invalid(format!(
                "canvas size {}x{} is not usable",
                self.canvas_width, self.canvas_height
            )));
        }
        if SerializableColor::from_hex(&self.background_color).is_none() {
            return Err(ConfigError::Invalid(format!(
                "background_color {:?} is not a hex color",
                self.background_color
            )));
        }
        Ok(())
    }

    /// Canvas for new documents.
    pub fn canvas(&self) -> CanvasSettings {
        CanvasSettings::parse(self.canvas_width, self.canvas_height, &self.background_color)
            .unwrap_or_default()
    }

    pub fn history_debounce(&self) -> Duration {
        Duration::from_millis(self.history_debounce_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn draft_debounce(&self) -> Duration {
        Duration::from_millis(self.draft_debounce_ms)
    }
}
