//! Draft autosave and startup recovery.
//!
//! The open document is written to a single draft record on a fixed
//! interval, and again shortly after each burst of mutations. Right before
//! teardown a synchronous copy goes to the fallback store. On startup the
//! newest of the two is restored.
//!
//! Like the rest of the crate, timing is driven by the caller: `poll`,
//! `maybe_save` and friends take the current [`Instant`].

use super::{Collection, FallbackStore, MemoryFallback, Storage, StorageError, StorageResult};
use crate::debounce::Debouncer;
use crate::document::DraftSnapshot;
use crate::session::{DocumentSession, Notice};
use crate::time::{Duration, Instant};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Quiet period after a mutation before the draft is written.
pub const DRAFT_DEBOUNCE_MS: u64 = 1000;

/// Key of the single draft record in [`Collection::Drafts`].
pub const DRAFT_KEY: &str = "__current_draft__";

/// Key of the emergency copy in the fallback store.
pub const FALLBACK_DRAFT_KEY: &str = "easel-draft-fallback";

/// Why a save is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    /// The periodic timer fired with unsaved changes.
    Interval,
    /// Mutations settled for the debounce window.
    Mutation,
}

/// What startup recovery did.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    Restored { layers: usize },
    /// No draft; the session holds an empty canvas.
    Empty,
    /// The draft was unreadable; the session holds an empty canvas.
    Failed(String),
    /// The session was torn down before the draft arrived. Nothing changed.
    Aborted,
}

/// Clears the in-flight flag when a save finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Manages draft persistence for one session.
pub struct AutoSaveManager<S: Storage + ?Sized> {
    /// Primary, asynchronous store.
    storage: Arc<S>,
    /// Synchronous store for emergency saves.
    fallback: Box<dyn FallbackStore>,
    interval: Duration,
    /// Next periodic tick; `None` while stopped.
    next_tick: Option<Instant>,
    mutations: Debouncer<()>,
    /// Whether there are changes not yet in the draft.
    dirty: bool,
    /// Session revision seen by the last `maybe_save`.
    seen_revision: Option<u64>,
    in_flight: AtomicBool,
    last_save: Option<Instant>,
}

impl<S: Storage + ?Sized> AutoSaveManager<S> {
    /// Create a manager with an in-memory fallback store.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_fallback(storage, Box::new(MemoryFallback::new()))
    }

    pub fn with_fallback(storage: Arc<S>, fallback: Box<dyn FallbackStore>) -> Self {
        Self {
            storage,
            fallback,
            interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            next_tick: None,
            mutations: Debouncer::new(Duration::from_millis(DRAFT_DEBOUNCE_MS)),
            dirty: false,
            seen_revision: None,
            in_flight: AtomicBool::new(false),
            last_save: None,
        }
    }

    /// Set the auto-save interval. Takes effect from the next tick.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_draft_debounce(&mut self, window: Duration) {
        self.mutations.set_window(window);
    }

    /// Start the periodic timer. The first tick is one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next_tick = Some(now + self.interval);
        log::info!("Autosave started ({}s interval)", self.interval.as_secs());
    }

    /// Stop the timer and drop any pending mutation save.
    pub fn stop(&mut self) {
        if self.next_tick.take().is_some() {
            log::info!("Autosave stopped");
        }
        self.mutations.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a draft write is in progress.
    pub fn is_saving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    /// Record a structural mutation. A save follows once mutations have been
    /// quiet for the debounce window.
    pub fn notify_mutation(&mut self, now: Instant) {
        self.dirty = true;
        if self.is_running() {
            self.mutations.schedule(now, ());
        }
    }

    /// Whether a save is due at `now`. Nothing is due while stopped or while
    /// a save is in flight; a settled mutation stays due until then.
    pub fn poll(&mut self, now: Instant) -> Option<SaveTrigger> {
        let next_tick = self.next_tick?;
        if self.is_saving() {
            return None;
        }
        if self.mutations.poll(now).is_some() {
            return Some(SaveTrigger::Mutation);
        }
        if now >= next_tick {
            self.next_tick = Some(now + self.interval);
            if self.dirty {
                return Some(SaveTrigger::Interval);
            }
        }
        None
    }

    /// Write the draft record, replacing any previous one.
    ///
    /// Returns `Ok(false)` without writing if another save is in flight.
    pub async fn save_draft(&self, draft: &DraftSnapshot) -> StorageResult<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Draft save already in flight, skipping");
            return Ok(false);
        }
        let _guard = InFlight(&self.in_flight);

        let json = draft
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.storage.put(Collection::Drafts, DRAFT_KEY, &json).await?;
        Ok(true)
    }

    /// Save the session's draft if a save is due.
    ///
    /// Changes are detected from the session's revision, so hosts only need
    /// to call this from their frame or timer callback. Failures become
    /// notices on the session. Returns whether a write happened.
    pub async fn maybe_save(&mut self, now: Instant, session: &mut DocumentSession) -> bool {
        let revision = session.revision();
        match self.seen_revision {
            Some(seen) if seen != revision => self.notify_mutation(now),
            _ => {}
        }
        self.seen_revision = Some(revision);

        let Some(trigger) = self.poll(now) else {
            return false;
        };
        let draft = match session.draft() {
            Ok(draft) => draft,
            Err(e) => {
                session.notify(Notice::error(format!("Could not prepare autosave: {}", e)));
                return false;
            }
        };
        match self.save_draft(&draft).await {
            Ok(true) => {
                log::debug!("Draft saved ({:?})", trigger);
                self.dirty = session.revision() != revision;
                self.last_save = Some(now);
                true
            }
            Ok(false) => false,
            Err(e) => {
                session.notify(Notice::warning(format!("Autosave failed: {}", e)));
                false
            }
        }
    }

    /// Synchronously write the draft to the fallback store, for use right
    /// before the host goes away.
    pub fn emergency_save(&self, session: &DocumentSession) -> StorageResult<()> {
        let json = session
            .draft()
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.fallback.set(FALLBACK_DRAFT_KEY, &json)?;
        log::info!("Emergency draft written");
        Ok(())
    }

    /// The newest available draft: the primary record, or the fallback copy
    /// when the primary is missing or older.
    ///
    /// An unreadable primary record is an error. An unreadable fallback copy
    /// is only logged.
    pub async fn load_draft(&self) -> StorageResult<Option<DraftSnapshot>> {
        let primary = match self.storage.get(Collection::Drafts, DRAFT_KEY).await {
            Ok(json) => Some(
                DraftSnapshot::from_json(&json)
                    .map_err(|e| StorageError::Serialization(format!("Corrupt draft: {}", e)))?,
            ),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                log::warn!("Could not read draft from primary store: {}", e);
                None
            }
        };

        let fallback = match self.fallback.get(FALLBACK_DRAFT_KEY) {
            Ok(Some(json)) => match DraftSnapshot::from_json(&json) {
                Ok(draft) => Some(draft),
                Err(e) => {
                    log::warn!("Ignoring corrupt fallback draft: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Could not read fallback draft: {}", e);
                None
            }
        };

        Ok(match (primary, fallback) {
            (Some(primary), Some(fallback)) if fallback.timestamp > primary.timestamp => {
                log::info!("Fallback draft is newer than the primary draft");
                Some(fallback)
            }
            (Some(primary), _) => Some(primary),
            (None, fallback) => fallback,
        })
    }

    /// Delete the draft from both stores, after an explicit save, export or
    /// discard.
    pub async fn clear_draft(&mut self) -> StorageResult<()> {
        self.storage.delete(Collection::Drafts, DRAFT_KEY).await?;
        self.fallback.remove(FALLBACK_DRAFT_KEY)?;
        self.mutations.cancel();
        self.dirty = false;
        Ok(())
    }

    /// Get a reference to the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

/// Load the newest draft and restore it into `session`.
pub async fn recover<S: Storage + ?Sized>(session: &mut DocumentSession, manager: &AutoSaveManager<S>) -> Recovery {
    let loaded = manager.load_draft().await;
    finish_recovery(session, loaded)
}

/// Apply a loaded draft to `session`.
///
/// Split from [`recover`] for hosts that cannot hold the session across the
/// load. Either way the session ends with exactly one `init` history entry,
/// unless it was disposed while the draft loaded.
pub fn finish_recovery(session: &mut DocumentSession, loaded: StorageResult<Option<DraftSnapshot>>) -> Recovery {
    if session.is_disposed() {
        log::warn!("Session disposed during recovery, not restoring");
        return Recovery::Aborted;
    }
    let failure = match loaded {
        Ok(Some(draft)) => match session.restore_draft(&draft) {
            Ok(layers) => return Recovery::Restored { layers },
            Err(e) => e.to_string(),
        },
        Ok(None) => {
            session.start_empty();
            log::info!("No draft to recover");
            return Recovery::Empty;
        }
        Err(e) => e.to_string(),
    };
    session.start_empty();
    session.notify(Notice::error(format!("Could not recover your last draft: {}", failure)));
    Recovery::Failed(failure)
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::history::HistoryAction;
    use crate::scene::{NodeContent, NodeTransform, SceneNode, ShapeKind};
    use crate::session::{Command, Outcome};
    use crate::storage::{BoxFuture, MemoryStorage, block_on};
    use std::sync::atomic::AtomicUsize;

    /// Memory storage that counts writes.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        puts: AtomicUsize,
    }

    impl CountingStorage {
        fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }
    }

    impl Storage for CountingStorage {
        fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(collection, key, value)
        }

        fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>> {
            self.inner.get(collection, key)
        }

        fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>> {
            self.inner.delete(collection, key)
        }

        fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>> {
            self.inner.list(collection)
        }

        fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
            self.inner.exists(collection, key)
        }
    }

    /// Storage whose writes never complete.
    struct StalledStorage;

    impl Storage for StalledStorage {
        fn put(&self, _: Collection, _: &str, _: &str) -> BoxFuture<'_, StorageResult<()>> {
            Box::pin(std::future::pending())
        }

        fn get(&self, _: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>> {
            let key = key.to_string();
            Box::pin(async move { Err(StorageError::NotFound(key)) })
        }

        fn delete(&self, _: Collection, _: &str) -> BoxFuture<'_, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn list(&self, _: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn exists(&self, _: Collection, _: &str) -> BoxFuture<'_, StorageResult<bool>> {
            Box::pin(async { Ok(false) })
        }
    }

    fn rect(left: f64) -> SceneNode {
        SceneNode::new(
            NodeContent::Shape {
                shape: ShapeKind::Rectangle { corner_radius: 0.0 },
            },
            NodeTransform::new(left, 10.0, 100.0, 100.0),
        )
    }

    fn add(session: &mut DocumentSession, name: &str, now: Instant) {
        let command = Command::AddLayer {
            name: name.into(),
            node: rect(10.0),
        };
        assert!(matches!(session.dispatch(command, now).unwrap(), Outcome::Added(_)));
    }

    #[test]
    fn test_nothing_due_while_stopped() {
        let storage = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(storage);
        let t0 = Instant::now();
        manager.notify_mutation(t0);
        assert!(manager.is_dirty());
        assert_eq!(manager.poll(t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_interval_tick_only_saves_when_dirty() {
        let storage = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(storage);
        let t0 = Instant::now();
        manager.start(t0);

        assert_eq!(manager.poll(t0 + Duration::from_secs(30)), None);
        manager.dirty = true;
        assert_eq!(manager.poll(t0 + Duration::from_secs(45)), None);
        assert_eq!(manager.poll(t0 + Duration::from_secs(60)), Some(SaveTrigger::Interval));
    }

    #[test]
    fn test_mutation_burst_writes_once() {
        let storage = Arc::new(CountingStorage::default());
        let mut manager = AutoSaveManager::new(storage.clone());
        let mut session = DocumentSession::default();
        let t0 = Instant::now();
        manager.start(t0);
        assert!(!block_on(manager.maybe_save(t0, &mut session)));

        for i in 0..5u64 {
            let now = t0 + Duration::from_millis(100 * i);
            add(&mut session, &format!("L{}", i), now);
            assert!(!block_on(manager.maybe_save(now, &mut session)));
        }
        // Last mutation seen at 400ms, due at 1400ms
        assert!(!block_on(manager.maybe_save(t0 + Duration::from_millis(1399), &mut session)));
        assert!(block_on(manager.maybe_save(t0 + Duration::from_millis(1400), &mut session)));
        assert!(!block_on(manager.maybe_save(t0 + Duration::from_millis(2500), &mut session)));
        assert_eq!(storage.puts(), 1);
        assert!(!manager.is_dirty());

        let draft = block_on(manager.load_draft()).unwrap().unwrap();
        assert_eq!(draft.scene().unwrap().objects.len(), 5);
    }

    #[test]
    fn test_stop_cancels_pending_save() {
        let storage = Arc::new(CountingStorage::default());
        let mut manager = AutoSaveManager::new(storage.clone());
        let t0 = Instant::now();
        manager.start(t0);
        manager.notify_mutation(t0);
        manager.stop();
        assert!(!manager.is_running());
        assert_eq!(manager.poll(t0 + Duration::from_secs(120)), None);
        assert_eq!(storage.puts(), 0);
    }

    #[test]
    fn test_save_skipped_while_in_flight() {
        let manager = AutoSaveManager::new(Arc::new(StalledStorage));
        let session = DocumentSession::default();
        let draft = session.draft().unwrap();
        {
            let mut first = std::pin::pin!(manager.save_draft(&draft));
            let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
            assert!(first.as_mut().poll(&mut cx).is_pending());
            assert!(manager.is_saving());
            assert!(!block_on(manager.save_draft(&draft)).unwrap());
        }
        // Dropping the stalled save releases the guard
        assert!(!manager.is_saving());
    }

    #[test]
    fn test_poll_waits_for_in_flight_save() {
        let mut manager = AutoSaveManager::new(Arc::new(MemoryStorage::new()));
        let t0 = Instant::now();
        manager.start(t0);
        manager.notify_mutation(t0);
        manager.in_flight.store(true, Ordering::Release);
        assert_eq!(manager.poll(t0 + Duration::from_secs(2)), None);
        manager.in_flight.store(false, Ordering::Release);
        assert_eq!(manager.poll(t0 + Duration::from_secs(3)), Some(SaveTrigger::Mutation));
    }

    #[test]
    fn test_recover_three_layers() {
        let storage = Arc::new(MemoryStorage::new());
        let t0 = Instant::now();

        let mut original = DocumentSession::default();
        for name in ["Heading", "Photo", "Badge"] {
            add(&mut original, name, t0);
        }
        let manager = AutoSaveManager::new(storage.clone());
        assert!(block_on(manager.save_draft(&original.draft().unwrap())).unwrap());

        // Restart
        let manager = AutoSaveManager::new(storage);
        let mut session = DocumentSession::default();
        let recovery = block_on(recover(&mut session, &manager));
        assert_eq!(recovery, Recovery::Restored { layers: 3 });

        let summary = |s: &DocumentSession| -> Vec<_> {
            s.layers()
                .list_layers()
                .iter()
                .map(|l| (l.id(), l.name.clone()))
                .collect()
        };
        assert_eq!(summary(&session), summary(&original));
        assert_eq!(session.canvas().width, 1080.0);
        assert_eq!(session.canvas().height, 1080.0);
        assert_eq!(session.history().entries().len(), 1);
        assert_eq!(session.history().entries()[0].action, HistoryAction::Init);
    }

    #[test]
    fn test_recover_without_draft_starts_empty() {
        let manager = AutoSaveManager::new(Arc::new(MemoryStorage::new()));
        let mut session = DocumentSession::default();
        add(&mut session, "Stale", Instant::now());

        assert_eq!(block_on(recover(&mut session, &manager)), Recovery::Empty);
        assert!(session.layers().is_empty());
        assert_eq!(session.history().entries().len(), 1);
        assert_eq!(session.history().entries()[0].action, HistoryAction::Init);
    }

    #[test]
    fn test_recover_corrupt_draft_reports_and_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        block_on(storage.put(Collection::Drafts, DRAFT_KEY, "{ definitely not a draft")).unwrap();
        let manager = AutoSaveManager::new(storage);
        let mut session = DocumentSession::default();

        let recovery = block_on(recover(&mut session, &manager));
        assert!(matches!(recovery, Recovery::Failed(_)));
        assert!(session.layers().is_empty());
        assert_eq!(session.history().entries().len(), 1);
        assert_eq!(session.take_notices().len(), 1);
    }

    #[test]
    fn test_recover_draft_with_corrupt_scene() {
        let storage = Arc::new(MemoryStorage::new());
        let session = DocumentSession::default();
        let mut draft = session.draft().unwrap();
        draft.document_json = "[1, 2".into();
        block_on(storage.put(Collection::Drafts, DRAFT_KEY, &draft.to_json().unwrap())).unwrap();

        let manager = AutoSaveManager::new(storage);
        let mut session = DocumentSession::default();
        assert!(matches!(block_on(recover(&mut session, &manager)), Recovery::Failed(_)));
        assert_eq!(session.history().entries().len(), 1);
    }

    #[test]
    fn test_recovery_aborts_on_disposed_session() {
        let mut session = DocumentSession::default();
        let draft = session.draft().unwrap();
        session.dispose();
        assert_eq!(finish_recovery(&mut session, Ok(Some(draft))), Recovery::Aborted);
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn test_emergency_save_is_recovered() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = AutoSaveManager::new(storage);
        let mut session = DocumentSession::default();
        add(&mut session, "Unsaved", Instant::now());

        manager.emergency_save(&session).unwrap();
        let draft = block_on(manager.load_draft()).unwrap().unwrap();
        assert_eq!(draft.scene().unwrap().objects.len(), 1);
    }

    #[test]
    fn test_newer_fallback_wins() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = AutoSaveManager::new(storage);
        let session = DocumentSession::default();

        let mut older = session.draft().unwrap();
        older.timestamp = 1_000;
        older.document_name = "primary".into();
        block_on(manager.save_draft(&older)).unwrap();

        let mut newer = older.clone();
        newer.timestamp = 2_000;
        newer.document_name = "fallback".into();
        manager
            .fallback
            .set(FALLBACK_DRAFT_KEY, &newer.to_json().unwrap())
            .unwrap();
        let loaded = block_on(manager.load_draft()).unwrap().unwrap();
        assert_eq!(loaded.document_name, "fallback");

        newer.timestamp = 500;
        manager
            .fallback
            .set(FALLBACK_DRAFT_KEY, &newer.to_json().unwrap())
            .unwrap();
        let loaded = block_on(manager.load_draft()).unwrap().unwrap();
        assert_eq!(loaded.document_name, "primary");
    }

    #[test]
    fn test_clear_draft_removes_both_copies() {
        let storage = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(storage);
        let session = DocumentSession::default();
        block_on(manager.save_draft(&session.draft().unwrap())).unwrap();
        manager.emergency_save(&session).unwrap();

        block_on(manager.clear_draft()).unwrap();
        assert!(block_on(manager.load_draft()).unwrap().is_none());
    }
}
