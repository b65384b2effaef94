//! Easel Core Library
//!
//! Platform-agnostic editor state for the Easel design studio: layers,
//! undo history, smart-guide snapping, clip masks and draft autosave.

pub mod clip;
pub mod config;
pub mod debounce;
pub mod document;
pub mod history;
pub mod image;
pub mod layer;
pub mod library;
pub mod scene;
pub mod session;
pub mod snap;
pub mod storage;
pub mod time;

pub use config::{ConfigError, EditorConfig};
pub use document::{CanvasSettings, DocumentError, DocumentFile, DraftSnapshot, FORMAT_VERSION};
pub use history::{History, HistoryAction, HistoryEntry};
pub use crate::image::{ImageError, ImageFormat, ImportedImage};
pub use layer::{Layer, LayerId, LayerKind, LayerPatch, LayerRegistry};
pub use library::{DocumentLibrary, DocumentSummary, VersionInfo, MAX_VERSIONS_PER_DOCUMENT};
pub use scene::{NodeContent, NodeKey, NodeTransform, SceneData, SceneGraph, SceneNode, SerializableColor};
pub use session::{Command, DocumentSession, FlipAxis, Notice, NoticeLevel, Outcome, SessionError, SessionEvent, StylePatch};
pub use snap::{Guide, SmartGuides, SnapResult, snap_bounds, SNAP_THRESHOLD};
pub use storage::{AutoSaveManager, Recovery, Storage, StorageError, recover};
