//! In-memory storage implementation.

use super::{BoxFuture, Collection, Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<(Collection, String), String>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all collections.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl Storage for MemoryStorage {
    fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut records = self.records.write().map_err(lock_error)?;
            records.insert((collection, key), value);
            Ok(())
        })
    }

    fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>> {
        let key = key.to_string();
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            records
                .get(&(collection, key.clone()))
                .cloned()
                .ok_or(StorageError::NotFound(key))
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut records = self.records.write().map_err(lock_error)?;
            records.remove(&(collection, key));
            Ok(())
        })
    }

    fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            Ok(records
                .keys()
                .filter(|(c, _)| *c == collection)
                .map(|(_, k)| k.clone())
                .collect())
        })
    }

    fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            Ok(records.contains_key(&(collection, key)))
        })
    }
}
