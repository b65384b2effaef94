//! Document session: the single owner of editor state.
//!
//! Every change goes through [`DocumentSession::dispatch`] as a named
//! [`Command`]. Discrete commands are recorded in history right away;
//! continuous ones (drag frames, style sliders, resize and rotate handles)
//! are coalesced and recorded once the history debounce window passes,
//! which the host drives through [`DocumentSession::tick`].
//!
//! Commands naming layers that no longer exist are expected (the UI can race
//! a deletion) and resolve to [`Outcome::Ignored`] rather than an error.

use crate::clip;
use crate::config::EditorConfig;
use crate::document::{CanvasSettings, DocumentError, DocumentFile, DraftSnapshot, valid_size};
use crate::history::{History, HistoryAction, HistoryEntry};
use crate::image::{ImportedImage, fit_within};
use crate::layer::{Layer, LayerId, LayerPatch, LayerRegistry};
use crate::scene::{NodeContent, SceneData, SceneError, SceneGraph, SceneNode, SerializableColor, ShapeKind};
use crate::snap::{Guide, SmartGuides, SnapResult};
use crate::time::{Instant, unix_millis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DOCUMENT_NAME: &str = "Untitled design";

/// Session errors. Only serialization problems surface here; invalid
/// commands are ignored instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to serialize scene: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Failed to restore scene: {0}")]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Mirror axis for [`Command::Flip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

/// Paint and content edits. `Some(None)` clears an optional property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StylePatch {
    pub fill: Option<Option<SerializableColor>>,
    pub stroke: Option<Option<SerializableColor>>,
    pub stroke_width: Option<f64>,
    pub stroke_dash: Option<Option<Vec<f64>>>,
    pub text: Option<String>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub corner_radius: Option<f64>,
}

impl StylePatch {
    fn apply(&self, node: &mut SceneNode) {
        if let Some(fill) = self.fill {
            node.paint.fill = fill;
        }
        if let Some(stroke) = self.stroke {
            node.paint.stroke = stroke;
        }
        if let Some(width) = self.stroke_width {
            node.paint.stroke_width = width.max(0.0);
        }
        if let Some(dash) = &self.stroke_dash {
            node.paint.stroke_dash = dash.clone();
        }
        match &mut node.content {
            NodeContent::Text {
                text,
                font_family,
                font_size,
            } => {
                if let Some(value) = &self.text {
                    *text = value.clone();
                }
                if let Some(value) = &self.font_family {
                    *font_family = value.clone();
                }
                if let Some(value) = self.font_size.filter(|s| *s > 0.0) {
                    *font_size = value;
                }
            }
            NodeContent::Shape {
                shape: ShapeKind::Rectangle { corner_radius },
            } => {
                if let Some(value) = self.corner_radius {
                    *corner_radius = value.max(0.0);
                }
            }
            _ => {}
        }
    }
}

/// A named, replayable editor mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    AddLayer { name: String, node: SceneNode },
    RemoveLayer { id: LayerId },
    UpdateLayer { id: LayerId, patch: LayerPatch },
    BeginDrag { id: LayerId },
    /// Proposed (unsnapped) top-left for the current drag frame.
    Drag { id: LayerId, left: f64, top: f64 },
    EndDrag { id: LayerId },
    Move { id: LayerId, left: f64, top: f64 },
    Resize { id: LayerId, width: f64, height: f64 },
    /// Absolute angle in degrees.
    Rotate { id: LayerId, angle: f64 },
    Flip { id: LayerId, axis: FlipAxis },
    SetStyle { id: LayerId, style: StylePatch },
    BindClip { mask: LayerId, target: LayerId },
    UnbindClip { target: LayerId },
    BringForward { id: LayerId },
    SendBackward { id: LayerId },
    SetCanvasSize { width: f64, height: f64 },
    SetBackground { color: SerializableColor },
    Rename { name: String },
    Undo,
    Redo,
    Select { ids: Vec<LayerId> },
}

impl Command {
    /// Commands whose history entry waits for the debounce window.
    fn is_continuous(&self) -> bool {
        match self {
            Command::Drag { .. }
            | Command::EndDrag { .. }
            | Command::Resize { .. }
            | Command::Rotate { .. }
            | Command::SetStyle { .. }
            | Command::Select { .. } => true,
            // Slider-style edits
            Command::UpdateLayer { patch, .. } => {
                patch.name.is_none() && patch.visible.is_none() && patch.locked.is_none()
            }
            _ => false,
        }
    }
}

/// Result of a dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    /// Nothing happened: missing layer, locked layer, invalid value, or
    /// nothing to undo/redo.
    Ignored,
    Added(LayerId),
    /// Every layer removed, cascade included.
    Removed(Vec<LayerId>),
    Dragged(SnapResult),
}

impl Outcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Something subscribers may want to redraw or react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Document content changed (history-tracked state).
    DocumentChanged(HistoryAction),
    /// The layer list was rebuilt or reordered.
    LayersChanged,
    HistoryChanged { can_undo: bool, can_redo: bool },
    SelectionChanged(Vec<LayerId>),
    GuidesChanged(Vec<Guide>),
    CanvasChanged(CanvasSettings),
    Renamed(String),
    Notice(Notice),
}

pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(&SessionEvent)>;

/// Editor state for one open document.
pub struct DocumentSession {
    scene: SceneGraph,
    layers: LayerRegistry,
    history: History,
    guides: SmartGuides,
    canvas: CanvasSettings,
    default_canvas: CanvasSettings,
    document_id: Option<String>,
    document_name: String,
    created_at: u64,
    selection: Vec<LayerId>,
    dragging: Option<LayerId>,
    notices: Vec<Notice>,
    /// Bumped on every change that belongs in a draft.
    revision: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
}

impl Default for DocumentSession {
    fn default() -> Self {
        Self::new(&EditorConfig::default())
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("document_id", &self.document_id)
            .field("document_name", &self.document_name)
            .field("layers", &self.layers.len())
            .field("history", &self.history.entries().len())
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl DocumentSession {
    /// A session on an empty canvas with its `init` history entry.
    pub fn new(config: &EditorConfig) -> Self {
        let canvas = config.canvas();
        let mut session = Self {
            scene: SceneGraph::new(),
            layers: LayerRegistry::new(),
            history: History::with_debounce(config.history_debounce()),
            guides: SmartGuides::new(config.snap_threshold),
            canvas,
            default_canvas: canvas,
            document_id: None,
            document_name: DEFAULT_DOCUMENT_NAME.to_string(),
            created_at: unix_millis(),
            selection: Vec::new(),
            dragging: None,
            notices: Vec::new(),
            revision: 0,
            listeners: Vec::new(),
            next_subscription: 1,
        };
        session.start_empty();
        session
    }

    // --- accessors ---

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get_layer(id)
    }

    /// Scene node backing a layer.
    pub fn node(&self, id: LayerId) -> Option<&SceneNode> {
        self.layers.node_key(id).and_then(|key| self.scene.get(key))
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn canvas(&self) -> CanvasSettings {
        self.canvas
    }

    pub fn selection(&self) -> &[LayerId] {
        &self.selection
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn set_document_id(&mut self, id: Option<String>) {
        self.document_id = id;
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    /// View zoom, used to keep the snap threshold constant on screen.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.guides.set_zoom(zoom);
    }

    pub fn guides(&self) -> &SmartGuides {
        &self.guides
    }

    // --- host lifecycle ---

    /// Tear down the scene, as when the hosting surface unmounts. Later
    /// commands are ignored.
    pub fn dispose(&mut self) {
        self.scene.dispose();
        self.layers = LayerRegistry::new();
        self.guides.clear(&mut self.scene);
        self.selection.clear();
        self.dragging = None;
        log::info!("Document session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.scene.is_disposed()
    }

    // --- subscriptions and notices ---

    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, event: SessionEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }

    /// Report a recoverable problem to the user without interrupting them.
    pub fn notify(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => log::info!("{}", notice.message),
            NoticeLevel::Warning => log::warn!("{}", notice.message),
            NoticeLevel::Error => log::error!("{}", notice.message),
        }
        self.notices.push(notice.clone());
        self.emit(SessionEvent::Notice(notice));
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // --- dispatch ---

    /// Apply a command.
    pub fn dispatch(&mut self, command: Command, now: Instant) -> SessionResult<Outcome> {
        if self.is_disposed() {
            log::warn!("Ignoring {:?} on a disposed session", command);
            return Ok(Outcome::Ignored);
        }
        if !command.is_continuous() {
            self.commit_pending()?;
        }

        match command {
            Command::AddLayer { name, node } => self.add_layer(name, node),
            Command::RemoveLayer { id } => self.remove_layer(id),
            Command::UpdateLayer { id, patch } => self.update_layer(id, patch, now),
            Command::BeginDrag { id } => Ok(self.begin_drag(id)),
            Command::Drag { id, left, top } => Ok(self.drag(id, left, top, now)),
            Command::EndDrag { id } => Ok(self.end_drag(id, now)),
            Command::Move { id, left, top } => self.edit_geometry(id, None, |node| {
                node.transform.left = left;
                node.transform.top = top;
                left.is_finite() && top.is_finite()
            }),
            Command::Resize { id, width, height } => self.edit_geometry(id, Some(now), |node| {
                if !valid_size(width, height) {
                    return false;
                }
                node.transform.width = width;
                node.transform.height = height;
                true
            }),
            Command::Rotate { id, angle } => self.edit_geometry(id, Some(now), |node| {
                node.transform.angle = angle.rem_euclid(360.0);
                angle.is_finite()
            }),
            Command::Flip { id, axis } => self.edit_geometry(id, None, |node| {
                match axis {
                    FlipAxis::Horizontal => node.transform.flip_x = !node.transform.flip_x,
                    FlipAxis::Vertical => node.transform.flip_y = !node.transform.flip_y,
                }
                true
            }),
            Command::SetStyle { id, style } => Ok(self.set_style(id, &style, now)),
            Command::BindClip { mask, target } => {
                if !clip::bind(&mut self.layers, &mut self.scene, mask, target) {
                    return Ok(Outcome::Ignored);
                }
                self.commit(HistoryAction::Modify, vec![mask, target])?;
                Ok(Outcome::Applied)
            }
            Command::UnbindClip { target } => {
                if !clip::unbind(&mut self.layers, &mut self.scene, target) {
                    return Ok(Outcome::Ignored);
                }
                self.commit(HistoryAction::Modify, vec![target])?;
                Ok(Outcome::Applied)
            }
            Command::BringForward { id } => self.shift(id, true),
            Command::SendBackward { id } => self.shift(id, false),
            Command::SetCanvasSize { width, height } => Ok(self.set_canvas_size(width, height)),
            Command::SetBackground { color } => {
                self.canvas.background = color;
                self.revision += 1;
                self.emit(SessionEvent::CanvasChanged(self.canvas));
                Ok(Outcome::Applied)
            }
            Command::Rename { name } => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Ok(Outcome::Ignored);
                }
                self.document_name = name.clone();
                self.revision += 1;
                self.emit(SessionEvent::Renamed(name));
                Ok(Outcome::Applied)
            }
            Command::Undo => self.undo(),
            Command::Redo => self.redo(),
            Command::Select { ids } => {
                self.set_selection(ids);
                Ok(Outcome::Applied)
            }
        }
    }

    /// Record a continuous change whose debounce window has closed.
    /// Returns whether a history entry was pushed.
    pub fn tick(&mut self, now: Instant) -> SessionResult<bool> {
        match self.history.poll_pending(now) {
            Some(pending) => self.record(pending.action, pending.affected_ids),
            None => Ok(false),
        }
    }

    /// Record any pending continuous change immediately.
    pub fn commit_pending(&mut self) -> SessionResult<bool> {
        match self.history.take_pending() {
            Some(pending) => self.record(pending.action, pending.affected_ids),
            None => Ok(false),
        }
    }

    /// Add an imported image, scaled down to fit and centered on the canvas.
    pub fn add_image(&mut self, image: &ImportedImage, name: impl Into<String>, now: Instant) -> SessionResult<Outcome> {
        let size = fit_within(image.natural_size(), self.canvas.size());
        let left = (self.canvas.width - size.width) / 2.0;
        let top = (self.canvas.height - size.height) / 2.0;
        self.dispatch(
            Command::AddLayer {
                name: name.into(),
                node: image.to_node(left, top, size),
            },
            now,
        )
    }

    // --- history ---

    /// Push the current scene as a history entry, skipping exact repeats.
    fn record(&mut self, action: HistoryAction, affected_ids: Vec<LayerId>) -> SessionResult<bool> {
        let snapshot = self.scene.to_json()?;
        if self.history.current().is_some_and(|e| e.snapshot == snapshot) {
            return Ok(false);
        }
        let pushed = self.history.push(HistoryEntry::new(snapshot, action, affected_ids));
        if pushed {
            self.emit_history();
        }
        Ok(pushed)
    }

    /// A discrete change: mark the document changed and record it now.
    fn commit(&mut self, action: HistoryAction, affected_ids: Vec<LayerId>) -> SessionResult<()> {
        self.touch(action);
        self.record(action, affected_ids)?;
        Ok(())
    }

    /// A continuous change: mark the document changed and record it later.
    fn defer(&mut self, action: HistoryAction, affected_ids: Vec<LayerId>, now: Instant) {
        self.touch(action);
        self.history.schedule(now, action, affected_ids);
    }

    fn touch(&mut self, action: HistoryAction) {
        self.revision += 1;
        self.emit(SessionEvent::DocumentChanged(action));
    }

    fn emit_history(&mut self) {
        let event = SessionEvent::HistoryChanged {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        };
        self.emit(event);
    }

    fn undo(&mut self) -> SessionResult<Outcome> {
        let undone = self
            .history
            .current()
            .map(|e| e.affected_ids.clone())
            .unwrap_or_default();
        let Some(snapshot) = self.history.peek_undo().map(|e| e.snapshot.clone()) else {
            return Ok(Outcome::Ignored);
        };
        // Cursor moves only once the snapshot parses
        let data = SceneData::from_json(&snapshot)?;
        self.history.undo();
        self.restore(data);
        self.set_selection(undone);
        self.emit_history();
        Ok(Outcome::Applied)
    }

    fn redo(&mut self) -> SessionResult<Outcome> {
        let Some((snapshot, redone)) = self
            .history
            .peek_redo()
            .map(|e| (e.snapshot.clone(), e.affected_ids.clone()))
        else {
            return Ok(Outcome::Ignored);
        };
        let data = SceneData::from_json(&snapshot)?;
        self.history.redo();
        self.restore(data);
        self.set_selection(redone);
        self.emit_history();
        Ok(Outcome::Applied)
    }

    /// Replace the document part of the scene with a snapshot and rebuild
    /// the registry and clip bindings from it.
    fn restore(&mut self, data: SceneData) {
        self.history.begin_restore();
        self.load_scene(data);
        self.history.end_restore();
        self.revision += 1;
    }

    fn load_scene(&mut self, data: SceneData) {
        self.guides.clear(&mut self.scene);
        self.dragging = None;
        self.scene.load_data(data);
        self.layers.sync_from_scene(&mut self.scene);
        let bindings = clip::rebuild(&mut self.layers, &mut self.scene);
        log::debug!(
            "Loaded {} layers with {} clip bindings",
            self.layers.len(),
            bindings
        );
        self.emit(SessionEvent::GuidesChanged(Vec::new()));
        self.emit(SessionEvent::LayersChanged);
    }

    // --- document lifecycle ---

    /// Reset to an empty canvas with a single `init` history entry.
    pub fn start_empty(&mut self) {
        self.canvas = self.default_canvas;
        self.document_id = None;
        self.document_name = DEFAULT_DOCUMENT_NAME.to_string();
        self.created_at = unix_millis();
        self.reset_with(SceneData::default());
        self.emit(SessionEvent::CanvasChanged(self.canvas));
    }

    fn reset_with(&mut self, data: SceneData) {
        self.history.clear();
        self.load_scene(data);
        self.set_selection(Vec::new());
        match self.scene.to_json() {
            Ok(snapshot) => {
                self.history
                    .push(HistoryEntry::new(snapshot, HistoryAction::Init, Vec::new()));
            }
            Err(e) => log::error!("Failed to snapshot initial scene: {}", e),
        }
        self.emit_history();
    }

    /// Current state as the autosave draft record.
    pub fn draft(&self) -> SessionResult<DraftSnapshot> {
        Ok(DraftSnapshot::new(
            self.scene.to_json()?,
            &self.canvas,
            self.document_name.clone(),
            self.document_id.clone(),
        ))
    }

    /// Reconstruct the document from a draft. Nothing changes if the draft
    /// cannot be parsed. Returns the number of layers restored.
    pub fn restore_draft(&mut self, draft: &DraftSnapshot) -> SessionResult<usize> {
        let data = draft.scene()?;
        let canvas = draft.canvas_settings()?;
        self.canvas = canvas;
        self.document_name = draft.document_name.clone();
        self.document_id = draft.document_id.clone();
        self.reset_with(data);
        self.emit(SessionEvent::CanvasChanged(self.canvas));
        log::info!(
            "Recovered draft {:?} with {} layers on a {}x{} canvas",
            self.document_name,
            self.layers.len(),
            canvas.width,
            canvas.height
        );
        Ok(self.layers.len())
    }

    /// Current state in the interchange format.
    pub fn to_document_file(&self) -> DocumentFile {
        let mut file = DocumentFile::new(
            self.document_id.clone(),
            self.document_name.clone(),
            &self.canvas,
            self.scene.to_data(),
        );
        file.created_at = self.created_at;
        file
    }

    /// Replace the session with an opened document.
    pub fn open_document_file(&mut self, file: &DocumentFile) -> SessionResult<()> {
        let canvas = file.canvas_settings()?;
        let data = file.canvas.scene.clone().validated()?;
        self.canvas = canvas;
        self.document_name = file.name.clone();
        self.document_id = file.id.clone();
        self.created_at = file.created_at;
        self.reset_with(data);
        self.emit(SessionEvent::CanvasChanged(self.canvas));
        Ok(())
    }

    // --- command handlers ---

    fn add_layer(&mut self, name: String, node: SceneNode) -> SessionResult<Outcome> {
        let Some(id) = self.layers.add_layer(&mut self.scene, name, node) else {
            log::debug!("Ignoring helper node passed as a layer");
            return Ok(Outcome::Ignored);
        };
        self.emit(SessionEvent::LayersChanged);
        self.commit(HistoryAction::Add, vec![id])?;
        self.set_selection(vec![id]);
        Ok(Outcome::Added(id))
    }

    fn remove_layer(&mut self, id: LayerId) -> SessionResult<Outcome> {
        if self.dragging == Some(id) {
            self.guides.clear(&mut self.scene);
            self.dragging = None;
        }
        let removed = self.layers.remove_layer(&mut self.scene, id);
        if removed.is_empty() {
            return Ok(Outcome::Ignored);
        }
        self.emit(SessionEvent::LayersChanged);
        self.commit(HistoryAction::Remove, removed.clone())?;
        let selection: Vec<LayerId> = self
            .selection
            .iter()
            .copied()
            .filter(|s| !removed.contains(s))
            .collect();
        self.set_selection(selection);
        Ok(Outcome::Removed(removed))
    }

    fn update_layer(&mut self, id: LayerId, patch: LayerPatch, now: Instant) -> SessionResult<Outcome> {
        if patch.is_empty() || !self.layers.update_layer(&mut self.scene, id, &patch) {
            return Ok(Outcome::Ignored);
        }
        self.emit(SessionEvent::LayersChanged);
        if patch.name.is_none() && patch.visible.is_none() && patch.locked.is_none() {
            self.defer(HistoryAction::Style, vec![id], now);
        } else {
            self.commit(HistoryAction::Modify, vec![id])?;
        }
        Ok(Outcome::Applied)
    }

    /// Node of an unlocked layer.
    fn editable_node(&mut self, id: LayerId) -> Option<&mut SceneNode> {
        let layer = self.layers.get_layer(id)?;
        if layer.locked {
            log::debug!("Layer {} is locked", id);
            return None;
        }
        let key = layer.node();
        self.scene.get_mut(key)
    }

    /// Apply a geometry edit. `edit` returns false to reject the values,
    /// leaving the node untouched. `defer_at` makes the change continuous.
    fn edit_geometry(
        &mut self,
        id: LayerId,
        defer_at: Option<Instant>,
        edit: impl FnOnce(&mut SceneNode) -> bool,
    ) -> SessionResult<Outcome> {
        let Some(node) = self.editable_node(id) else {
            return Ok(Outcome::Ignored);
        };
        let before = node.transform;
        if !edit(node) {
            node.transform = before;
            return Ok(Outcome::Ignored);
        }
        clip::refresh(&self.layers, &mut self.scene, id);
        match defer_at {
            Some(now) => self.defer(HistoryAction::Modify, vec![id], now),
            None => self.commit(HistoryAction::Modify, vec![id])?,
        }
        Ok(Outcome::Applied)
    }

    fn set_style(&mut self, id: LayerId, style: &StylePatch, now: Instant) -> Outcome {
        let Some(node) = self.editable_node(id) else {
            return Outcome::Ignored;
        };
        style.apply(node);
        clip::refresh(&self.layers, &mut self.scene, id);
        self.defer(HistoryAction::Style, vec![id], now);
        Outcome::Applied
    }

    fn begin_drag(&mut self, id: LayerId) -> Outcome {
        if self.editable_node(id).is_none() {
            return Outcome::Ignored;
        }
        self.guides.clear(&mut self.scene);
        self.dragging = Some(id);
        Outcome::Applied
    }

    fn drag(&mut self, id: LayerId, left: f64, top: f64, now: Instant) -> Outcome {
        if !left.is_finite() || !top.is_finite() {
            return Outcome::Ignored;
        }
        if self.dragging != Some(id) && matches!(self.begin_drag(id), Outcome::Ignored) {
            return Outcome::Ignored;
        }
        let Some(node) = self.editable_node(id) else {
            return Outcome::Ignored;
        };
        node.transform.left = left;
        node.transform.top = top;

        let canvas = self.canvas.size();
        let Some(result) = self.guides.apply(&mut self.scene, &self.layers, id, canvas) else {
            return Outcome::Ignored;
        };
        clip::refresh(&self.layers, &mut self.scene, id);
        self.emit(SessionEvent::GuidesChanged(result.guides()));
        self.defer(HistoryAction::Modify, vec![id], now);
        Outcome::Dragged(result)
    }

    fn end_drag(&mut self, id: LayerId, now: Instant) -> Outcome {
        if self.dragging != Some(id) {
            return Outcome::Ignored;
        }
        self.guides.clear(&mut self.scene);
        self.dragging = None;
        self.emit(SessionEvent::GuidesChanged(Vec::new()));
        // Restart the window so the gesture is recorded once, after release
        if self.history.has_pending() {
            self.history.schedule(now, HistoryAction::Modify, vec![id]);
        }
        Outcome::Applied
    }

    fn shift(&mut self, id: LayerId, forward: bool) -> SessionResult<Outcome> {
        let Some(key) = self.layers.node_key(id) else {
            return Ok(Outcome::Ignored);
        };
        if !self.scene.shift(key, forward) {
            return Ok(Outcome::Ignored);
        }
        self.layers.sort_by_scene(&self.scene);
        self.emit(SessionEvent::LayersChanged);
        self.commit(HistoryAction::Modify, vec![id])?;
        Ok(Outcome::Applied)
    }

    fn set_canvas_size(&mut self, width: f64, height: f64) -> Outcome {
        if !valid_size(width, height) {
            log::debug!("Ignoring canvas size {}x{}", width, height);
            return Outcome::Ignored;
        }
        self.canvas.width = width;
        self.canvas.height = height;
        self.revision += 1;
        self.emit(SessionEvent::CanvasChanged(self.canvas));
        Outcome::Applied
    }

    fn set_selection(&mut self, ids: Vec<LayerId>) {
        let mut selection: Vec<LayerId> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.layers.contains(id) && !selection.contains(&id) {
                selection.push(id);
            }
        }
        if selection != self.selection {
            self.selection = selection.clone();
            self.emit(SessionEvent::SelectionChanged(selection));
        }
    }
}
