//! Snapshot-based undo/redo.
//!
//! History is a linear list of serialized scene snapshots with a cursor on
//! the entry that matches the current scene. Pushing while the cursor is
//! behind the tip discards everything after it. Continuous gestures are
//! coalesced through a debounce window so one entry captures the gesture's
//! final state.

use crate::debounce::Debouncer;
use crate::layer::LayerId;
use crate::time::{Duration, Instant, unix_millis};
use serde::{Deserialize, Serialize};

/// Quiet period after the last continuous change before it is recorded.
pub const HISTORY_DEBOUNCE_MS: u64 = 300;

/// What produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Init,
    Add,
    Remove,
    Modify,
    Style,
}

/// One undoable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Serialized scene, helpers excluded.
    pub snapshot: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub action: HistoryAction,
    /// Layers implicated, re-selected when this entry is restored.
    pub affected_ids: Vec<LayerId>,
}

impl HistoryEntry {
    pub fn new(snapshot: String, action: HistoryAction, affected_ids: Vec<LayerId>) -> Self {
        Self {
            snapshot,
            timestamp: unix_millis(),
            action,
            affected_ids,
        }
    }
}

/// A continuous change waiting for its debounce window to close.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub action: HistoryAction,
    pub affected_ids: Vec<LayerId>,
}

/// Undo/redo stack with a single cursor.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: Option<usize>,
    restoring: bool,
    pending: Debouncer<PendingEntry>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_debounce(Duration::from_millis(HISTORY_DEBOUNCE_MS))
    }

    pub fn with_debounce(window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            restoring: false,
            pending: Debouncer::new(window),
        }
    }

    /// Append an entry after the cursor, discarding any redo branch.
    ///
    /// Ignored while a restore is in progress. Returns whether it was pushed.
    pub fn push(&mut self, entry: HistoryEntry) -> bool {
        if self.restoring {
            log::debug!("Ignoring {:?} history push during restore", entry.action);
            return false;
        }
        let keep = self.cursor.map_or(0, |c| c + 1);
        if keep < self.entries.len() {
            log::debug!("Discarding {} redo entries", self.entries.len() - keep);
            self.entries.truncate(keep);
        }
        self.entries.push(entry);
        self.cursor = Some(self.entries.len() - 1);
        true
    }

    /// Move the cursor back and return the entry to restore.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        match self.cursor {
            Some(c) if c > 0 => {
                self.cursor = Some(c - 1);
                self.entries.get(c - 1)
            }
            _ => None,
        }
    }

    /// Move the cursor forward and return the entry to restore.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.entries.len() || self.cursor.is_none() {
            return None;
        }
        self.cursor = Some(next);
        self.entries.get(next)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    /// Index of the entry matching the current scene.
    pub fn cursor_index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    /// Entry just before the cursor (the one `undo` would restore).
    pub fn peek_undo(&self) -> Option<&HistoryEntry> {
        match self.cursor {
            Some(c) if c > 0 => self.entries.get(c - 1),
            _ => None,
        }
    }

    /// Entry just after the cursor (the one `redo` would restore).
    pub fn peek_redo(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c + 1))
    }

    /// Mark the start of a scene restore. Pushes are ignored until
    /// [`History::end_restore`].
    pub fn begin_restore(&mut self) {
        self.restoring = true;
    }

    pub fn end_restore(&mut self) {
        self.restoring = false;
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    /// Note a continuous change. The newest call in a window wins.
    pub fn schedule(&mut self, now: Instant, action: HistoryAction, affected_ids: Vec<LayerId>) {
        if self.restoring {
            return;
        }
        self.pending.schedule(
            now,
            PendingEntry {
                action,
                affected_ids,
            },
        );
    }

    /// Pending change whose window has closed, if any.
    pub fn poll_pending(&mut self, now: Instant) -> Option<PendingEntry> {
        self.pending.poll(now)
    }

    /// Pending change regardless of its window.
    pub fn take_pending(&mut self) -> Option<PendingEntry> {
        self.pending.flush()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_pending()
    }

    pub fn set_debounce(&mut self, window: Duration) {
        self.pending.set_window(window);
    }

    /// Forget everything, as for a freshly opened document.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
        self.restoring = false;
        self.pending.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(snapshot: &str, action: HistoryAction) -> HistoryEntry {
        HistoryEntry::new(snapshot.to_string(), action, Vec::new())
    }

    fn snapshots(history: &History) -> Vec<&str> {
        history.entries().iter().map(|e| e.snapshot.as_str()).collect()
    }

    #[test]
    fn test_empty_history() {
        let mut history = History::new();
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert_eq!(history.cursor_index(), None);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_at_first_entry_is_noop() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        assert!(history.undo().is_none());
        assert_eq!(history.cursor_index(), Some(0));
    }

    #[test]
    fn test_undo_redo_walks_entries() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        history.push(entry("s1", HistoryAction::Add));
        history.push(entry("s2", HistoryAction::Modify));

        assert_eq!(history.undo().map(|e| e.snapshot.clone()), Some("s1".into()));
        assert_eq!(history.undo().map(|e| e.snapshot.clone()), Some("s0".into()));
        assert!(history.undo().is_none());
        assert_eq!(history.redo().map(|e| e.snapshot.clone()), Some("s1".into()));
        assert_eq!(history.redo().map(|e| e.snapshot.clone()), Some("s2".into()));
        assert!(history.redo().is_none());
        assert_eq!(history.cursor_index(), Some(2));
    }

    #[test]
    fn test_peek_does_not_move_cursor() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        history.push(entry("s1", HistoryAction::Add));
        assert_eq!(history.peek_undo().map(|e| e.snapshot.as_str()), Some("s0"));
        assert!(history.peek_redo().is_none());
        assert_eq!(history.cursor_index(), Some(1));

        history.undo();
        assert!(history.peek_undo().is_none());
        assert_eq!(history.peek_redo().map(|e| e.snapshot.as_str()), Some("s1"));
        assert_eq!(history.cursor_index(), Some(0));
    }

    #[test]
    fn test_push_discards_redo_branch() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        history.push(entry("s1", HistoryAction::Add));
        history.push(entry("s2", HistoryAction::Add));
        history.undo();
        history.undo();

        history.push(entry("s3", HistoryAction::Style));
        assert_eq!(snapshots(&history), vec!["s0", "s3"]);
        assert_eq!(history.cursor_index(), Some(1));
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_push_ignored_while_restoring() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        history.begin_restore();
        assert!(!history.push(entry("s1", HistoryAction::Modify)));
        history.schedule(Instant::now(), HistoryAction::Modify, Vec::new());
        assert!(!history.has_pending());
        history.end_restore();
        assert!(history.push(entry("s1", HistoryAction::Modify)));
        assert_eq!(history.entries().len(), 2);
    }

    #[test]
    fn test_pending_coalesces_to_last() {
        let t0 = Instant::now();
        let mut history = History::new();
        let id = uuid::Uuid::new_v4();
        history.schedule(t0, HistoryAction::Style, Vec::new());
        history.schedule(t0 + Duration::from_millis(100), HistoryAction::Modify, vec![id]);
        assert!(history.poll_pending(t0 + Duration::from_millis(399)).is_none());

        let pending = history.poll_pending(t0 + Duration::from_millis(400)).unwrap();
        assert_eq!(pending.action, HistoryAction::Modify);
        assert_eq!(pending.affected_ids, vec![id]);
        assert!(!history.has_pending());
    }

    #[test]
    fn test_clear() {
        let mut history = History::new();
        history.push(entry("s0", HistoryAction::Init));
        history.schedule(Instant::now(), HistoryAction::Modify, Vec::new());
        history.clear();
        assert!(history.entries().is_empty());
        assert!(!history.has_pending());
        assert_eq!(history.cursor_index(), None);
    }
}
