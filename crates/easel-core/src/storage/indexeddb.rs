//! IndexedDB storage implementation for WebAssembly.
//!
//! One object store per [`Collection`], records stored as JSON strings.

use super::{BoxFuture, Collection, Storage, StorageError, StorageResult};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{IdbDatabase, IdbObjectStore, IdbRequest, IdbTransactionMode};

const DB_NAME: &str = "easel";
const DB_VERSION: u32 = 1;

/// IndexedDB-based storage for WebAssembly.
///
/// Not Send/Sync: WASM is single-threaded and IndexedDB handles are not
/// thread-safe.
pub struct IndexedDbStorage {
    /// Cached database connection.
    db: Rc<RefCell<Option<IdbDatabase>>>,
}

impl IndexedDbStorage {
    /// Create a new IndexedDB storage.
    ///
    /// The database connection is established lazily on first use.
    pub fn new() -> Self {
        Self {
            db: Rc::new(RefCell::new(None)),
        }
    }

    /// Whether the browser exposes IndexedDB at all.
    pub fn is_available() -> bool {
        web_sys::window()
            .and_then(|w| w.indexed_db().ok().flatten())
            .is_some()
    }

    /// Open or create the database, returning a handle.
    async fn get_db(&self) -> StorageResult<IdbDatabase> {
        if let Some(db) = self.db.borrow().as_ref() {
            return Ok(db.clone());
        }

        let window =
            web_sys::window().ok_or_else(|| StorageError::Unavailable("No window object".to_string()))?;

        let idb_factory = window
            .indexed_db()
            .map_err(|e| StorageError::Unavailable(format!("IndexedDB error: {:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("IndexedDB not available".to_string()))?;

        let open_request = idb_factory
            .open_with_u32(DB_NAME, DB_VERSION)
            .map_err(|e| StorageError::Other(format!("Failed to open DB: {:?}", e)))?;

        let onupgrade = Closure::once(Box::new(move |event: web_sys::IdbVersionChangeEvent| {
            let db = event
                .target()
                .and_then(|t| t.dyn_into::<IdbRequest>().ok())
                .and_then(|r| r.result().ok())
                .and_then(|r| r.dyn_into::<IdbDatabase>().ok());
            let Some(db) = db else {
                log::error!("IndexedDB upgrade without a database");
                return;
            };
            for collection in Collection::ALL {
                if db.object_store_names().contains(collection.name()) {
                    continue;
                }
                if let Err(e) = db.create_object_store(collection.name()) {
                    log::error!("Failed to create object store {}: {:?}", collection.name(), e);
                }
            }
        }) as Box<dyn FnOnce(_)>);

        open_request.set_onupgradeneeded(Some(onupgrade.as_ref().unchecked_ref()));
        onupgrade.forget();

        let db = await_idb_request::<IdbDatabase>(&open_request).await?;
        *self.db.borrow_mut() = Some(db.clone());
        Ok(db)
    }

    /// Get the object store for a collection within a new transaction.
    fn get_store(
        &self,
        db: &IdbDatabase,
        collection: Collection,
        mode: IdbTransactionMode,
    ) -> StorageResult<IdbObjectStore> {
        let transaction = db
            .transaction_with_str_and_mode(collection.name(), mode)
            .map_err(|e| StorageError::Other(format!("Transaction error: {:?}", e)))?;

        transaction
            .object_store(collection.name())
            .map_err(|e| StorageError::Other(format!("Store error: {:?}", e)))
    }
}

impl Default for IndexedDbStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for IndexedDbStorage {
    fn put(&self, collection: Collection, key: &str, value: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        let value = value.to_string();

        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, collection, IdbTransactionMode::Readwrite)?;
            let request = store
                .put_with_key(&JsValue::from_str(&value), &JsValue::from_str(&key))
                .map_err(|e| StorageError::Io(format!("Put error: {:?}", e)))?;
            await_idb_request::<JsValue>(&request).await?;
            Ok(())
        })
    }

    fn get(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<String>> {
        let key = key.to_string();

        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, collection, IdbTransactionMode::Readonly)?;
            let request = store
                .get(&JsValue::from_str(&key))
                .map_err(|e| StorageError::Io(format!("Get error: {:?}", e)))?;

            let result = await_idb_request::<JsValue>(&request).await?;
            if result.is_undefined() || result.is_null() {
                return Err(StorageError::NotFound(key));
            }
            result
                .as_string()
                .ok_or_else(|| StorageError::Serialization("Invalid stored data".to_string()))
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();

        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, collection, IdbTransactionMode::Readwrite)?;
            let request = store
                .delete(&JsValue::from_str(&key))
                .map_err(|e| StorageError::Io(format!("Delete error: {:?}", e)))?;
            await_idb_request::<JsValue>(&request).await?;
            Ok(())
        })
    }

    fn list(&self, collection: Collection) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, collection, IdbTransactionMode::Readonly)?;
            let request = store
                .get_all_keys()
                .map_err(|e| StorageError::Io(format!("GetAllKeys error: {:?}", e)))?;

            let result = await_idb_request::<js_sys::Array>(&request).await?;
            Ok(result.iter().filter_map(|key| key.as_string()).collect())
        })
    }

    fn exists(&self, collection: Collection, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let key = key.to_string();

        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, collection, IdbTransactionMode::Readonly)?;
            let request = store
                .count_with_key(&JsValue::from_str(&key))
                .map_err(|e| StorageError::Io(format!("Count error: {:?}", e)))?;

            let result = await_idb_request::<JsValue>(&request).await?;
            Ok(result.as_f64().unwrap_or(0.0) > 0.0)
        })
    }
}

/// Await an IndexedDB request through a Promise.
async fn await_idb_request<T: JsCast>(request: &IdbRequest) -> StorageResult<T> {
    use wasm_bindgen_futures::JsFuture;

    let promise = js_sys::Promise::new(&mut |resolve, reject| {
        let reject_on_error = reject.clone();
        let onsuccess = Closure::once(Box::new(move |event: web_sys::Event| {
            let result = event
                .target()
                .and_then(|t| t.dyn_into::<IdbRequest>().ok())
                .and_then(|r| r.result().ok());
            let outcome = match result {
                Some(value) => resolve.call1(&JsValue::NULL, &value),
                None => reject.call1(&JsValue::NULL, &JsValue::from_str("IndexedDB request has no result")),
            };
            if let Err(e) = outcome {
                log::error!("IndexedDB callback failed: {:?}", e);
            }
        }) as Box<dyn FnOnce(_)>);

        let onerror = Closure::once(Box::new(move |_event: web_sys::Event| {
            if let Err(e) =
                reject_on_error.call1(&JsValue::NULL, &JsValue::from_str("IndexedDB request failed"))
            {
                log::error!("IndexedDB callback failed: {:?}", e);
            }
        }) as Box<dyn FnOnce(_)>);

        request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
        request.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        onsuccess.forget();
        onerror.forget();
    });

    JsFuture::from(promise)
        .await
        .map_err(|e| StorageError::Io(format!("IndexedDB request failed: {:?}", e)))?
        .dyn_into::<T>()
        .map_err(|_| StorageError::Other("Type conversion failed".to_string()))
}
