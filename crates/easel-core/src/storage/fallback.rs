//! Synchronous best-effort key-value stores.
//!
//! These back the emergency save that runs while the page or process is
//! going away and nothing can be awaited.

use super::{StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Simple string key-value store with synchronous access.
pub trait FallbackStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Fallback store kept in memory.
#[derive(Default)]
pub struct MemoryFallback {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryFallback {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl FallbackStore for MemoryFallback {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().map_err(lock_error)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .write()
            .map_err(lock_error)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.write().map_err(lock_error)?.remove(key);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;
    use crate::storage::encode_key;
    use std::fs;
    use std::path::PathBuf;

    /// Fallback store writing one plain file per key.
    pub struct FileFallback {
        dir: PathBuf,
    }

    impl FileFallback {
        pub fn new(dir: PathBuf) -> StorageResult<Self> {
            fs::create_dir_all(&dir).map_err(|e| {
                StorageError::Io(format!("Failed to create fallback directory {}: {}", dir.display(), e))
            })?;
            Ok(Self { dir })
        }

        pub fn default_location() -> StorageResult<Self> {
            Self::new(crate::storage::file::default_data_dir()?.join("fallback"))
        }

        fn path(&self, key: &str) -> PathBuf {
            self.dir.join(encode_key(key))
        }
    }

    impl FallbackStore for FileFallback {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            let path = self.path(key);
            if !path.exists() {
                return Ok(None);
            }
            fs::read_to_string(&path)
                .map(Some)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            let path = self.path(key);
            fs::write(&path, value)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            let path = self.path(key);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    StorageError::Io(format!("Failed to delete {}: {}", path.display(), e))
                })?;
            }
            Ok(())
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::FileFallback;

#[cfg(target_arch = "wasm32")]
mod web {
    use super::*;

    /// Fallback store on `window.localStorage`.
    pub struct LocalStorageFallback {
        storage: web_sys::Storage,
    }

    impl LocalStorageFallback {
        pub fn new() -> StorageResult<Self> {
            let window = web_sys::window()
                .ok_or_else(|| StorageError::Unavailable("No window object".to_string()))?;
            let storage = window
                .local_storage()
                .map_err(|e| StorageError::Unavailable(format!("localStorage error: {:?}", e)))?
                .ok_or_else(|| StorageError::Unavailable("localStorage not available".to_string()))?;
            Ok(Self { storage })
        }
    }

    impl FallbackStore for LocalStorageFallback {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.storage
                .get_item(key)
                .map_err(|e| StorageError::Other(format!("localStorage get failed: {:?}", e)))
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            // Quota errors surface here
            self.storage
                .set_item(key, value)
                .map_err(|e| StorageError::Io(format!("localStorage set failed: {:?}", e)))
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.storage
                .remove_item(key)
                .map_err(|e| StorageError::Other(format!("localStorage remove failed: {:?}", e)))
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use web::LocalStorageFallback;

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn FallbackStore) {
        assert_eq!(store.get("draft").unwrap(), None);
        store.set("draft", "one").unwrap();
        store.set("draft", "two").unwrap();
        assert_eq!(store.get("draft").unwrap().as_deref(), Some("two"));
        store.remove("draft").unwrap();
        assert_eq!(store.get("draft").unwrap(), None);
        store.remove("draft").unwrap();
    }

    #[test]
    fn test_memory_fallback() {
        exercise(&MemoryFallback::new());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFallback::new(dir.path().join("fallback")).unwrap();
        exercise(&store);
        store.set("easel:draft", "x").unwrap();
        assert_eq!(store.get("easel:draft").unwrap().as_deref(), Some("x"));
    }
}
