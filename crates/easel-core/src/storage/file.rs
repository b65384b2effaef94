//! File-based storage implementation for native platforms.

use super::{BoxFuture, Collection, Storage, StorageError, StorageResult, decode_key, encode_key};
use std::fs;
use std::path::{Path, PathBuf};

/// File-based storage for native platforms.
///
/// Stores each record as a JSON file under `<base>/<collection>/`.
pub struct FileStorage {
    /// Base directory for record storage.
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base directory.
    ///
    /// Creates the directory and one subdirectory per collection.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        for collection in Collection::ALL {
            let dir = base_path.join(collection.name());
            fs::create_dir_all(&dir).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create file storage in the default location.
    ///
    /// On Unix: `~/.local/share/easel/`
    /// On Windows: `%LOCALAPPDATA%\easel\`
    pub fn default_location() -> StorageResult<Self> {
        Self::new(default_data_dir()?)
    }

    fn collection_path(&self, collection: Collection) -> PathBuf {
        self.base_path.join(collection.name())
    }

    /// Get the file path for a record.
    fn record_path(&self, collection: Collection, key: &str) -> PathBuf {
        self.collection_path(collection)
            .join(format!("{}.json", encode_key(key)))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Per-user data directory for the editor.
pub(crate) fn default_data_dir() -> StorageResult<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| StorageError::Unavailable("Could not determine home directory".to_string()))?;
    Ok(base.join("easel"))
}

impl Storage for FileStorage {
    fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.record_path(collection, key);
        let value = value.to_string();

        Box::pin(async move {
            // Replace atomically
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, value)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
            fs::rename(&tmp, &path)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
        })
    }

    fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>> {
        let path = self.record_path(collection, key);
        let key = key.to_string();

        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(key));
            }
            fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.record_path(collection, key);

        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    StorageError::Io(format!("Failed to delete {}: {}", path.display(), e))
                })?;
            }
            Ok(())
        })
    }

    fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let dir = self.collection_path(collection);

        Box::pin(async move {
            if !dir.exists() {
                return Ok(vec![]);
            }

            let entries = fs::read_dir(&dir)
                .map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

            let mut keys = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_none_or(|e| e != "json") {
                    continue;
                }
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(decode_key) {
                    keys.push(key);
                }
            }
            Ok(keys)
        })
    }

    fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.record_path(collection, key);
        Box::pin(async move { Ok(path.exists()) })
    }
}
