//! Document interchange format and the autosave draft record.

use crate::scene::{SceneData, SceneError, SerializableColor};
use crate::time::unix_millis;
use kurbo::Size;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the interchange file layout.
pub const FORMAT_VERSION: u32 = 1;

pub const DEFAULT_CANVAS_WIDTH: f64 = 1080.0;
pub const DEFAULT_CANVAS_HEIGHT: f64 = 1080.0;

/// Document format errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Document has no format version")]
    MissingVersion,
    #[error("Unsupported document version: {0}")]
    UnsupportedVersion(u64),
    #[error("Invalid scene: {0}")]
    Scene(#[from] SceneError),
    #[error("Invalid canvas size: {0}x{1}")]
    InvalidCanvas(f64, f64),
    #[error("Invalid background color: {0}")]
    InvalidColor(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Canvas dimensions and background. Not part of undo history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSettings {
    pub width: f64,
    pub height: f64,
    pub background: SerializableColor,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
            background: SerializableColor::white(),
        }
    }
}

impl CanvasSettings {
    /// Validated settings from serialized parts.
    pub fn parse(width: f64, height: f64, background: &str) -> DocumentResult<Self> {
        if !valid_size(width, height) {
            return Err(DocumentError::InvalidCanvas(width, height));
        }
        let background = SerializableColor::from_hex(background)
            .ok_or_else(|| DocumentError::InvalidColor(background.to_string()))?;
        Ok(Self {
            width,
            height,
            background,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Whether a canvas size is usable.
pub fn valid_size(width: f64, height: f64) -> bool {
    width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0
}

/// Canvas section of a [`DocumentFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasPayload {
    pub width: f64,
    pub height: f64,
    pub background_color: String,
    pub scene: SceneData,
}

/// A saved document as exchanged through save-as and open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub updated_at: u64,
    pub canvas: CanvasPayload,
}

impl DocumentFile {
    pub fn new(id: Option<String>, name: impl Into<String>, canvas: &CanvasSettings, scene: SceneData) -> Self {
        let now = unix_millis();
        Self {
            version: FORMAT_VERSION,
            id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            canvas: CanvasPayload {
                width: canvas.width,
                height: canvas.height,
                background_color: canvas.background.to_hex(),
                scene,
            },
        }
    }

    pub fn to_json(&self) -> DocumentResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, rejecting other format versions and scenes the
    /// current scene layout cannot load.
    pub fn from_json(json: &str) -> DocumentResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or(DocumentError::MissingVersion)?;
        if version != u64::from(FORMAT_VERSION) {
            return Err(DocumentError::UnsupportedVersion(version));
        }
        let mut file: DocumentFile = serde_json::from_value(raw)?;
        file.canvas.scene = std::mem::take(&mut file.canvas.scene).validated()?;
        file.canvas_settings()?;
        Ok(file)
    }

    pub fn canvas_settings(&self) -> DocumentResult<CanvasSettings> {
        CanvasSettings::parse(
            self.canvas.width,
            self.canvas.height,
            &self.canvas.background_color,
        )
    }
}

/// The single autosaved working copy of the open document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    /// Serialized scene, helpers excluded.
    pub document_json: String,
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub background_color: String,
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl DraftSnapshot {
    pub fn new(
        document_json: String,
        canvas: &CanvasSettings,
        document_name: impl Into<String>,
        document_id: Option<String>,
    ) -> Self {
        Self {
            document_json,
            canvas_width: canvas.width,
            canvas_height: canvas.height,
            background_color: canvas.background.to_hex(),
            document_name: document_name.into(),
            document_id,
            timestamp: unix_millis(),
        }
    }

    pub fn to_json(&self) -> DocumentResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> DocumentResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn scene(&self) -> DocumentResult<SceneData> {
        Ok(SceneData::from_json(&self.document_json)?)
    }

    pub fn canvas_settings(&self) -> DocumentResult<CanvasSettings> {
        CanvasSettings::parse(self.canvas_width, self.canvas_height, &self.background_color)
    }
}
