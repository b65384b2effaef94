//! Storage abstraction for persistence.
//!
//! Records are JSON strings grouped in [`Collection`]s. The async [`Storage`]
//! trait is the primary store; [`FallbackStore`] is a synchronous string
//! key-value store used when there is no time to await, such as right before
//! the page goes away.

mod autosave;
mod fallback;
mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(target_arch = "wasm32")]
mod indexeddb;

pub use autosave::{
    AutoSaveManager, DEFAULT_AUTOSAVE_INTERVAL_SECS, DRAFT_DEBOUNCE_MS, DRAFT_KEY,
    FALLBACK_DRAFT_KEY, Recovery, SaveTrigger, finish_recovery, recover,
};
pub use fallback::{FallbackStore, MemoryFallback};
pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use fallback::FileFallback;
#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

#[cfg(target_arch = "wasm32")]
pub use fallback::LocalStorageFallback;
#[cfg(target_arch = "wasm32")]
pub use indexeddb::IndexedDbStorage;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Record groups kept by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// The autosaved working copy.
    Drafts,
    /// Explicitly saved documents.
    Documents,
    /// Saved versions of documents.
    Versions,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Drafts, Collection::Documents, Collection::Versions];

    /// Stable name, used for directories and object stores.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Drafts => "drafts",
            Collection::Documents => "documents",
            Collection::Versions => "versions",
        }
    }
}

/// Trait for record storage backends.
///
/// Note: On native platforms, implementations must be Send + Sync.
/// On WASM, these bounds are relaxed since it's single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait Storage: Send + Sync {
    /// Insert or overwrite a record.
    fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// Read a record.
    fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>>;

    /// Delete a record. Deleting a missing record is not an error.
    fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all keys in a collection.
    fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a record exists.
    fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>>;

    /// Keys in a collection accepted by `filter`, sorted.
    fn query<'a>(
        &'a self,
        collection: Collection,
        filter: &'a dyn Fn(&str) -> bool,
    ) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let mut keys = self.list(collection).await?;
            keys.retain(|k| filter(k.as_str()));
            keys.sort();
            Ok(keys)
        })
    }
}

/// Trait for record storage backends (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait Storage {
    /// Insert or overwrite a record.
    fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// Read a record.
    fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>>;

    /// Delete a record. Deleting a missing record is not an error.
    fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all keys in a collection.
    fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a record exists.
    fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>>;

    /// Keys in a collection accepted by `filter`, sorted.
    fn query<'a>(
        &'a self,
        collection: Collection,
        filter: &'a dyn Fn(&str) -> bool,
    ) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let mut keys = self.list(collection).await?;
            keys.retain(|k| filter(k.as_str()));
            keys.sort();
            Ok(keys)
        })
    }
}

/// Serialize `value` and store it.
pub async fn put_json<S, T>(storage: &S, collection: Collection, key: &str, value: &T) -> StorageResult<()>
where
    S: Storage + ?Sized,
    T: Serialize,
{
    let json = serde_json::to_string(value)?;
    storage.put(collection, key, &json).await
}

/// Read a record and deserialize it.
pub async fn get_json<S, T>(storage: &S, collection: Collection, key: &str) -> StorageResult<T>
where
    S: Storage + ?Sized,
    T: DeserializeOwned,
{
    let json = storage.get(collection, key).await?;
    serde_json::from_str(&json)
        .map_err(|e| StorageError::Serialization(format!("Failed to parse {}/{}: {}", collection.name(), key, e)))
}

/// Bytes kept as-is in encoded keys.
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Encode a record key into a filesystem-safe name, reversibly.
#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
pub(crate) fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ESCAPE).to_string()
}

/// Inverse of [`encode_key`]. Returns `None` for names it did not produce.
#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
pub(crate) fn decode_key(name: &str) -> Option<String> {
    let key = percent_decode_str(name).decode_utf8().ok()?.into_owned();
    (encode_key(&key) == name).then_some(key)
}

/// Create a platform-appropriate storage backend.
///
/// Falls back to in-memory storage (with a warning) when the platform store
/// cannot be used, so the editor keeps working without persistence.
#[cfg(not(target_arch = "wasm32"))]
pub fn create_default_storage(base_path: Option<std::path::PathBuf>) -> Arc<dyn Storage> {
    let storage = match base_path {
        Some(path) => FileStorage::new(path),
        None => FileStorage::default_location(),
    };
    match storage {
        Ok(storage) => {
            log::info!("Using file storage at {}", storage.base_path().display());
            Arc::new(storage)
        }
        Err(e) => {
            log::warn!("File storage unavailable ({}), falling back to memory", e);
            Arc::new(MemoryStorage::new())
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub fn create_default_storage(_base_path: Option<std::path::PathBuf>) -> Arc<dyn Storage> {
    if IndexedDbStorage::is_available() {
        Arc::new(IndexedDbStorage::new())
    } else {
        log::warn!("IndexedDB unavailable, falling back to memory");
        Arc::new(MemoryStorage::new())
    }
}

/// Create the synchronous store used for emergency saves.
#[cfg(not(target_arch = "wasm32"))]
pub fn create_default_fallback(base_path: Option<std::path::PathBuf>) -> Box<dyn FallbackStore> {
    let fallback = match base_path {
        Some(path) => FileFallback::new(path.join("fallback")),
        None => FileFallback::default_location(),
    };
    match fallback {
        Ok(fallback) => Box::new(fallback),
        Err(e) => {
            log::warn!("Fallback file store unavailable ({}), using memory", e);
            Box::new(MemoryFallback::new())
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub fn create_default_fallback(_base_path: Option<std::path::PathBuf>) -> Box<dyn FallbackStore> {
    match LocalStorageFallback::new() {
        Ok(fallback) => Box::new(fallback),
        Err(e) => {
            log::warn!("localStorage unavailable ({}), using memory", e);
            Box::new(MemoryFallback::new())
        }
    }
}

/// Simple blocking executor for tests.
#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        match f.as_mut().poll(&mut cx) {
            Poll::Ready(result) => return result,
            Poll::Pending => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_round_trip() {
        for key in ["plain", "doc@3", "test/doc:with*special", "ünï", "a%b"] {
            let encoded = encode_key(key);
            assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b"-_%".contains(&b)));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
        assert_eq!(decode_key("bad%zz"), None);
        assert_eq!(decode_key("lower%2fcase"), None);
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let storage = MemoryStorage::new();
        for key in ["b@2", "a@1", "b@1", "c"] {
            block_on(storage.put(Collection::Versions, key, "{}")).unwrap();
        }
        let filter = |k: &str| k.starts_with("b@");
        let keys = block_on(storage.query(Collection::Versions, &filter)).unwrap();
        assert_eq!(keys, vec!["b@1".to_string(), "b@2".to_string()]);
    }

    #[test]
    fn test_json_helpers() {
        let storage = MemoryStorage::new();
        block_on(put_json(&storage, Collection::Documents, "n", &vec![1, 2, 3])).unwrap();
        let back: Vec<i32> = block_on(get_json(&storage, Collection::Documents, "n")).unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        block_on(storage.put(Collection::Documents, "bad", "not json")).unwrap();
        let result: StorageResult<Vec<i32>> = block_on(get_json(&storage, Collection::Documents, "bad"));
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_default_storage_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        // A file where the directory should be makes the file store unusable
        let storage = create_default_storage(Some(blocker.join("sub")));
        block_on(storage.put(Collection::Drafts, "k", "v")).unwrap();
        assert_eq!(block_on(storage.get(Collection::Drafts, "k")).unwrap(), "v");
    }
}
