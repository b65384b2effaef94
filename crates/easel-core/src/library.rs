//! Saved documents and their version history.
//!
//! Versions are stored under `"<document id>@<sequence>"` keys. Each
//! document keeps at most a fixed number of versions; saving one more drops
//! the oldest. This is separate from the in-session undo history.

use crate::document::DocumentFile;
use crate::storage::{Collection, Storage, StorageError, StorageResult, get_json, put_json};
use crate::time::unix_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Versions retained per document.
pub const MAX_VERSIONS_PER_DOCUMENT: usize = 20;

/// Listing entry for a saved document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub updated_at: u64,
}

/// Listing entry for a saved version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub document_id: String,
    pub seq: u32,
    pub label: Option<String>,
    pub saved_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionRecord {
    #[serde(flatten)]
    info: VersionInfo,
    document: String,
}

fn version_key(document_id: &str, seq: u32) -> String {
    format!("{}@{}", document_id, seq)
}

fn parse_version_key(key: &str) -> Option<(&str, u32)> {
    let (id, seq) = key.rsplit_once('@')?;
    Some((id, seq.parse().ok()?))
}

fn parse_document(json: &str) -> StorageResult<DocumentFile> {
    DocumentFile::from_json(json).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Saved documents and versions on top of a [`Storage`] backend.
pub struct DocumentLibrary<S: Storage + ?Sized> {
    storage: Arc<S>,
    max_versions: usize,
}

impl<S: Storage + ?Sized> DocumentLibrary<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            max_versions: MAX_VERSIONS_PER_DOCUMENT,
        }
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions.max(1);
        self
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Save a document, assigning an id if it has none. Returns the id.
    pub async fn save(&self, file: &mut DocumentFile) -> StorageResult<String> {
        let id = file
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        file.updated_at = unix_millis();
        let json = file
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.storage.put(Collection::Documents, &id, &json).await?;
        log::info!("Saved document {} ({})", file.name, id);
        Ok(id)
    }

    pub async fn load(&self, id: &str) -> StorageResult<DocumentFile> {
        let json = self.storage.get(Collection::Documents, id).await?;
        parse_document(&json)
    }

    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        self.storage.exists(Collection::Documents, id).await
    }

    /// Saved documents, most recently updated first. Unreadable records are
    /// skipped with a warning.
    pub async fn list(&self) -> StorageResult<Vec<DocumentSummary>> {
        let mut summaries = Vec::new();
        for id in self.storage.list(Collection::Documents).await? {
            let loaded = self.load(&id).await;
            match loaded {
                Ok(file) => summaries.push(DocumentSummary {
                    id,
                    name: file.name,
                    updated_at: file.updated_at,
                }),
                Err(e) => log::warn!("Skipping unreadable document {}: {}", id, e),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Delete a document and all of its versions.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        self.storage.delete(Collection::Documents, id).await?;
        for info in self.list_versions(id).await? {
            self.storage
                .delete(Collection::Versions, &version_key(id, info.seq))
                .await?;
        }
        Ok(())
    }

    /// Record a new version of a document, pruning the oldest beyond the cap.
    pub async fn save_version(
        &self,
        document_id: &str,
        file: &DocumentFile,
        label: Option<String>,
    ) -> StorageResult<VersionInfo> {
        let existing = self.version_seqs(document_id).await?;
        let seq = existing.last().map_or(1, |s| s + 1);
        let info = VersionInfo {
            document_id: document_id.to_string(),
            seq,
            label,
            saved_at: unix_millis(),
        };
        let record = VersionRecord {
            info: info.clone(),
            document: file
                .to_json()
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        };
        put_json(
            self.storage.as_ref(),
            Collection::Versions,
            &version_key(document_id, seq),
            &record,
        )
        .await?;

        let total = existing.len() + 1;
        if total > self.max_versions {
            for old in &existing[..total - self.max_versions] {
                self.storage
                    .delete(Collection::Versions, &version_key(document_id, *old))
                    .await?;
            }
            log::info!(
                "Pruned {} old versions of {}",
                total - self.max_versions,
                document_id
            );
        }
        Ok(info)
    }

    /// Versions of a document, newest first.
    pub async fn list_versions(&self, document_id: &str) -> StorageResult<Vec<VersionInfo>> {
        let mut versions = Vec::new();
        for seq in self.version_seqs(document_id).await?.into_iter().rev() {
            let key = version_key(document_id, seq);
            match get_json::<S, VersionRecord>(self.storage.as_ref(), Collection::Versions, &key).await {
                Ok(record) => versions.push(record.info),
                Err(e) => log::warn!("Skipping unreadable version {}: {}", key, e),
            }
        }
        Ok(versions)
    }

    pub async fn load_version(&self, document_id: &str, seq: u32) -> StorageResult<DocumentFile> {
        let record: VersionRecord = get_json(
            self.storage.as_ref(),
            Collection::Versions,
            &version_key(document_id, seq),
        )
        .await?;
        parse_document(&record.document)
    }

    /// Sequence numbers stored for a document, ascending.
    async fn version_seqs(&self, document_id: &str) -> StorageResult<Vec<u32>> {
        let filter = |key: &str| parse_version_key(key).is_some_and(|(id, _)| id == document_id);
        let mut seqs: Vec<u32> = self
            .storage
            .query(Collection::Versions, &filter)
            .await?
            .iter()
            .filter_map(|key| parse_version_key(key).map(|(_, seq)| seq))
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }
}
