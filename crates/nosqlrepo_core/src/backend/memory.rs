//! In-process document store adapter.
//!
//! # Responsibility
//! - Hold documents, expiration entries, blobs and hash indices in memory.
//! - Share one store between every backend acquired from the same connector,
//!   so a reconnect sees the data written before close.
//!
//! # Invariants
//! - Index postings always mirror the non-deleted documents of a bucket.
//! - A poisoned lock surfaces as `BackendError::LockPoisoned`.
//!
//! # Native modes
//! - `InsertMode::DbImplementation` on a live id leaves the record alone and
//!   reports a duplicate without failing.
//! - `UpdateMode::DbImplementation` on a missing id inserts.
//!
//! # Races
//! Each call takes the store lock once. The repository's check-then-act
//! sequences span several calls, so two repositories on one connector can
//! interleave between the check and the write.

use super::{
    index_key, index_keys, Backend, BackendCapabilities, BackendError, BackendResult, Connector,
    EngineKind, NativeInsert, NativeUpdate, StoredBlob, StoredDocument,
};
use crate::model::entity::EntityId;
use crate::model::expiration::ExpirationEntry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Postings of one field index: normalized key to matching ids.
type Postings = HashMap<String, BTreeSet<EntityId>>;

#[derive(Debug, Default)]
struct Bucket {
    documents: BTreeMap<EntityId, StoredDocument>,
    expirations: HashMap<EntityId, Option<DateTime<Utc>>>,
    blobs: BTreeMap<(EntityId, String), StoredBlob>,
    indexes: HashMap<String, Postings>,
}

impl Bucket {
    fn unindex(&mut self, document: &StoredDocument) {
        if document.deleted {
            return;
        }
        for (field, postings) in self.indexes.iter_mut() {
            for key in index_keys(&document.body, field) {
                if let Some(ids) = postings.get_mut(&key) {
                    ids.remove(&document.id);
                }
            }
        }
    }

    fn index(&mut self, document: &StoredDocument) {
        if document.deleted {
            return;
        }
        for (field, postings) in self.indexes.iter_mut() {
            for key in index_keys(&document.body, field) {
                postings.entry(key).or_default().insert(document.id.clone());
            }
        }
    }

    fn rebuild_index(&mut self, field: &str) {
        let mut postings = Postings::new();
        for document in self.documents.values().filter(|doc| !doc.deleted) {
            for key in index_keys(&document.body, field) {
                postings.entry(key).or_default().insert(document.id.clone());
            }
        }
        self.indexes.insert(field.to_string(), postings);
    }

    fn remove_document(&mut self, id: &str) -> bool {
        match self.documents.remove(id) {
            Some(document) => {
                self.unindex(&document);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    collections: BTreeMap<String, Bucket>,
}

/// Construction parameters for [`MemoryBackend`].
///
/// Clones share the same underlying store.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: Arc<RwLock<MemoryStore>>,
    name: String,
    capabilities: BackendCapabilities,
}

impl MemoryConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::default())),
            name: name.into(),
            capabilities: BackendCapabilities {
                native_insert: NativeInsert::ReportDuplicate,
                native_update: NativeUpdate::Upsert,
                upsert_if_missing: true,
                secondary_indexes: true,
            },
        }
    }

    /// Overrides the advertised capabilities, e.g. to model an engine without
    /// secondary indices.
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Connector for MemoryConnector {
    type Backend = MemoryBackend;

    fn connect(&self) -> BackendResult<MemoryBackend> {
        Ok(MemoryBackend {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            capabilities: self.capabilities,
        })
    }
}

/// Handle onto a shared in-process store.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<RwLock<MemoryStore>>,
    name: String,
    capabilities: BackendCapabilities,
}

impl MemoryBackend {
    fn read(&self) -> BackendResult<RwLockReadGuard<'_, MemoryStore>> {
        self.store.read().map_err(|_| BackendError::LockPoisoned)
    }

    fn write(&self) -> BackendResult<RwLockWriteGuard<'_, MemoryStore>> {
        self.store.write().map_err(|_| BackendError::LockPoisoned)
    }

    fn with_bucket<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&Bucket) -> R,
    ) -> BackendResult<Option<R>> {
        let store = self.read()?;
        Ok(store.collections.get(collection).map(f))
    }

    fn with_bucket_mut<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Bucket) -> R,
    ) -> BackendResult<R> {
        let mut store = self.write()?;
        let bucket = store.collections.entry(collection.to_string()).or_default();
        Ok(f(bucket))
    }

    fn with_existing_bucket_mut<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Bucket) -> R,
    ) -> BackendResult<Option<R>> {
        let mut store = self.write()?;
        Ok(store.collections.get_mut(collection).map(f))
    }

    fn ensure_indexes_enabled(&self) -> BackendResult<()> {
        if self.capabilities.secondary_indexes {
            Ok(())
        } else {
            Err(BackendError::Unsupported("secondary indexes"))
        }
    }
}

impl Backend for MemoryBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Memory
    }

    fn database_name(&self) -> &str {
        self.name.as_str()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn collection_exists(&self, collection: &str) -> BackendResult<bool> {
        Ok(self.read()?.collections.contains_key(collection))
    }

    fn create_collection(&self, collection: &str) -> BackendResult<()> {
        self.with_bucket_mut(collection, |_| ())
    }

    fn truncate_collection(&self, collection: &str) -> BackendResult<u64> {
        let removed = self.with_existing_bucket_mut(collection, |bucket| {
            let removed = bucket.documents.len() as u64;
            bucket.documents.clear();
            bucket.expirations.clear();
            bucket.blobs.clear();
            for postings in bucket.indexes.values_mut() {
                postings.clear();
            }
            removed
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn drop_collection(&self, collection: &str) -> BackendResult<()> {
        self.write()?.collections.remove(collection);
        Ok(())
    }

    fn get_document(&self, collection: &str, id: &str) -> BackendResult<Option<StoredDocument>> {
        Ok(self
            .with_bucket(collection, |bucket| bucket.documents.get(id).cloned())?
            .flatten())
    }

    fn put_document(&self, collection: &str, document: &StoredDocument) -> BackendResult<()> {
        self.with_bucket_mut(collection, |bucket| {
            if let Some(previous) = bucket.documents.remove(&document.id) {
                bucket.unindex(&previous);
            }
            bucket.index(document);
            bucket
                .documents
                .insert(document.id.clone(), document.clone());
        })
    }

    fn delete_document(&self, collection: &str, id: &str) -> BackendResult<bool> {
        Ok(self
            .with_existing_bucket_mut(collection, |bucket| bucket.remove_document(id))?
            .unwrap_or(false))
    }

    fn enumerate_documents(
        &self,
        collection: &str,
        include_deleted: bool,
    ) -> BackendResult<Vec<StoredDocument>> {
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .documents
                    .values()
                    .filter(|doc| include_deleted || !doc.deleted)
                    .cloned()
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn document_ids(&self, collection: &str, include_deleted: bool) -> BackendResult<Vec<EntityId>> {
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .documents
                    .values()
                    .filter(|doc| include_deleted || !doc.deleted)
                    .map(|doc| doc.id.clone())
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn get_expiration(&self, collection: &str, id: &str) -> BackendResult<Option<ExpirationEntry>> {
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .expirations
                    .get(id)
                    .map(|date| ExpirationEntry::new(id, *date))
            })?
            .flatten())
    }

    fn put_expiration(&self, collection: &str, entry: &ExpirationEntry) -> BackendResult<()> {
        self.with_bucket_mut(collection, |bucket| {
            bucket
                .expirations
                .insert(entry.id.clone(), entry.expiration_date);
        })
    }

    fn delete_expiration(&self, collection: &str, id: &str) -> BackendResult<bool> {
        Ok(self
            .with_existing_bucket_mut(collection, |bucket| bucket.expirations.remove(id).is_some())?
            .unwrap_or(false))
    }

    fn expired_ids(&self, collection: &str, now: DateTime<Utc>) -> BackendResult<HashSet<EntityId>> {
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .expirations
                    .iter()
                    .filter(|(_, date)| matches!(date, Some(date) if *date <= now))
                    .map(|(id, _)| id.clone())
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn get_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<Option<StoredBlob>> {
        let key = (id.to_string(), name.to_string());
        Ok(self
            .with_bucket(collection, |bucket| bucket.blobs.get(&key).cloned())?
            .flatten())
    }

    fn put_blob(
        &self,
        collection: &str,
        id: &str,
        name: &str,
        blob: &StoredBlob,
    ) -> BackendResult<()> {
        self.with_bucket_mut(collection, |bucket| {
            bucket
                .blobs
                .insert((id.to_string(), name.to_string()), blob.clone());
        })
    }

    fn delete_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<bool> {
        let key = (id.to_string(), name.to_string());
        Ok(self
            .with_existing_bucket_mut(collection, |bucket| bucket.blobs.remove(&key).is_some())?
            .unwrap_or(false))
    }

    fn list_blob_names(&self, collection: &str, id: &str) -> BackendResult<Vec<String>> {
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .blobs
                    .keys()
                    .filter(|(owner, _)| owner == id)
                    .map(|(_, name)| name.clone())
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn purge_orphan_expirations(&self, collection: &str) -> BackendResult<u64> {
        let removed = self.with_existing_bucket_mut(collection, |bucket| {
            let before = bucket.expirations.len();
            let documents = &bucket.documents;
            bucket.expirations.retain(|id, _| documents.contains_key(id));
            (before - bucket.expirations.len()) as u64
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn purge_orphan_blobs(&self, collection: &str) -> BackendResult<u64> {
        let removed = self.with_existing_bucket_mut(collection, |bucket| {
            let before = bucket.blobs.len();
            let documents = &bucket.documents;
            bucket.blobs.retain(|(id, _), _| documents.contains_key(id));
            (before - bucket.blobs.len()) as u64
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn create_index(&self, collection: &str, field: &str) -> BackendResult<()> {
        self.ensure_indexes_enabled()?;
        self.with_bucket_mut(collection, |bucket| {
            if !bucket.indexes.contains_key(field) {
                bucket.rebuild_index(field);
            }
        })
    }

    fn has_index(&self, collection: &str, field: &str) -> BackendResult<bool> {
        if !self.capabilities.secondary_indexes {
            return Ok(false);
        }
        Ok(self
            .with_bucket(collection, |bucket| bucket.indexes.contains_key(field))?
            .unwrap_or(false))
    }

    fn lookup_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> BackendResult<Vec<EntityId>> {
        self.ensure_indexes_enabled()?;
        let key = index_key(value).ok_or_else(|| {
            BackendError::InvalidData("index lookups require a scalar value".to_string())
        })?;
        Ok(self
            .with_bucket(collection, |bucket| {
                bucket
                    .indexes
                    .get(field)
                    .and_then(|postings| postings.get(&key))
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default()
            })?
            .unwrap_or_default())
    }

    fn compact(&self) -> BackendResult<()> {
        let mut store = self.write()?;
        for bucket in store.collections.values_mut() {
            for postings in bucket.indexes.values_mut() {
                postings.retain(|_, ids| !ids.is_empty());
                postings.shrink_to_fit();
            }
            bucket.expirations.shrink_to_fit();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryConnector;
    use crate::backend::{Backend, Connector, StoredDocument};
    use crate::model::expiration::ExpirationEntry;
    use chrono::Utc;
    use serde_json::json;

    fn document(id: &str, deleted: bool, body: serde_json::Value) -> StoredDocument {
        let now = Utc::now();
        StoredDocument {
            id: id.to_string(),
            discriminator: "Doc".to_string(),
            deleted,
            system_creation_date: now,
            system_last_update_date: now,
            body,
        }
    }

    #[test]
    fn reconnect_shares_the_same_store() {
        let connector = MemoryConnector::new("shared");
        let first = connector.connect().unwrap();
        first
            .put_document("docs", &document("a", false, json!({"id": "a"})))
            .unwrap();

        let second = connector.connect().unwrap();
        assert!(second.get_document("docs", "a").unwrap().is_some());
    }

    #[test]
    fn index_postings_follow_document_rewrites() {
        let backend = MemoryConnector::new("idx").connect().unwrap();
        backend.create_index("docs", "tag").unwrap();
        backend
            .put_document("docs", &document("a", false, json!({"tag": "x"})))
            .unwrap();
        assert_eq!(
            backend.lookup_by_index("docs", "tag", &json!("x")).unwrap(),
            vec!["a".to_string()]
        );

        backend
            .put_document("docs", &document("a", false, json!({"tag": "y"})))
            .unwrap();
        assert!(backend
            .lookup_by_index("docs", "tag", &json!("x"))
            .unwrap()
            .is_empty());

        backend
            .put_document("docs", &document("a", true, json!({"tag": "y"})))
            .unwrap();
        assert!(backend
            .lookup_by_index("docs", "tag", &json!("y"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn orphan_purges_drop_entries_without_documents() {
        let backend = MemoryConnector::new("orphans").connect().unwrap();
        backend
            .put_document("docs", &document("a", false, json!({})))
            .unwrap();
        backend
            .put_expiration("docs", &ExpirationEntry::never("a"))
            .unwrap();
        backend
            .put_expiration("docs", &ExpirationEntry::never("ghost"))
            .unwrap();

        assert_eq!(backend.purge_orphan_expirations("docs").unwrap(), 1);
        assert!(backend.get_expiration("docs", "a").unwrap().is_some());
    }
}
