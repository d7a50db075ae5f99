//! Repository core: entity lifecycle over any storage adapter.
//!
//! # Responsibility
//! - Assign ids and audit dates, run the insert and update state machines.
//! - Apply soft-delete and expiration visibility on every read path.
//! - Own the adapter connection and re-acquire it on demand.
//!
//! # Invariants
//! - A record is readable only when present, not deleted and not expired,
//!   checked in that order.
//! - Every insert and update records the discriminator with the payload and
//!   resets the expiration entry to "never expires".
//! - Stored payloads are serialized copies; callers never share state with
//!   storage.
//! - Check-then-act sequences are not atomic; see the adapter docs for the
//!   race each engine exposes.

use crate::backend::{
    Backend, BackendCapabilities, Connector, EngineKind, NativeInsert, NativeUpdate,
    StoredDocument,
};
use crate::model::entity::{new_entity_id, Entity, EntityId};
use crate::naming::is_valid_collection_name;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::expiration::{utc_now, ExpirationOverlay};
use crate::repo::modes::{
    BulkInsertEntry, BulkInsertResult, DeleteMode, InsertMode, InsertResult, UpdateMode,
    UpdateResult,
};
use crate::repo::polymorphic::TypeRegistry;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;

/// Construction options for [`Repository`].
#[derive(Debug)]
pub struct RepositoryOptions<T> {
    /// Overrides the default collection name `T::TYPE_NAME`.
    pub collection_name: Option<String>,
    /// Whether insert and update stamp the audit dates.
    pub auto_entity_dates: bool,
    pub type_registry: TypeRegistry<T>,
}

impl<T: Entity> Default for RepositoryOptions<T> {
    fn default() -> Self {
        Self {
            collection_name: None,
            auto_entity_dates: true,
            type_registry: TypeRegistry::new(),
        }
    }
}

/// Visibility state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    Live,
    Deleted,
    Expired,
}

/// Diagnostic view of a record regardless of its visibility.
#[derive(Debug)]
pub struct InspectedEntity<T> {
    pub status: EntityStatus,
    pub entity: T,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Resolution of an id against storage and the expiration overlay.
pub(crate) enum Lookup {
    Absent,
    Deleted(StoredDocument),
    Expired(StoredDocument),
    Live(StoredDocument),
}

/// Typed repository over one collection of `T`.
pub struct Repository<T: Entity, C: Connector> {
    connector: C,
    backend: Option<C::Backend>,
    engine: EngineKind,
    database_name: String,
    collection: String,
    auto_entity_dates: bool,
    registry: TypeRegistry<T>,
}

impl<T: Entity, C: Connector> Repository<T, C> {
    /// Connects with default options.
    pub fn open(connector: C) -> RepoResult<Self> {
        Self::open_with(connector, RepositoryOptions::default())
    }

    pub fn open_with(connector: C, options: RepositoryOptions<T>) -> RepoResult<Self> {
        let collection = options
            .collection_name
            .unwrap_or_else(|| T::TYPE_NAME.to_string());
        validate_collection_name(&collection)?;

        let backend = connector.connect()?;
        let engine = backend.engine();
        let database_name = backend.database_name().to_string();
        info!(
            "event=repo_open module=repo status=ok engine={} database={} collection={}",
            engine.as_str(),
            database_name,
            collection
        );

        Ok(Self {
            connector,
            backend: Some(backend),
            engine,
            database_name,
            collection,
            auto_entity_dates: options.auto_entity_dates,
            registry: options.type_registry,
        })
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn database_name(&self) -> &str {
        self.database_name.as_str()
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_str()
    }

    /// Points later operations at another collection. Stored data is not
    /// moved.
    pub fn set_collection_name(&mut self, name: impl Into<String>) -> RepoResult<()> {
        let name = name.into();
        validate_collection_name(&name)?;
        debug!(
            "event=collection_rename module=repo status=ok from={} to={}",
            self.collection, name
        );
        self.collection = name;
        Ok(())
    }

    pub fn capabilities(&self) -> RepoResult<BackendCapabilities> {
        Ok(self.backend()?.capabilities())
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Releases the adapter connection. Closing twice is a no-op.
    pub fn close(&mut self) -> RepoResult<()> {
        match self.backend.take() {
            Some(backend) => {
                backend.close()?;
                info!(
                    "event=repo_close module=repo status=ok engine={} collection={}",
                    self.engine.as_str(),
                    self.collection
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Re-acquires a connection from the original construction parameters,
    /// closing the current one first.
    pub fn connect_again(&mut self) -> RepoResult<()> {
        if let Some(backend) = self.backend.take() {
            if let Err(err) = backend.close() {
                warn!(
                    "event=repo_reconnect module=repo status=warn engine={} error={}",
                    self.engine.as_str(),
                    err
                );
            }
        }
        self.backend = Some(self.connector.connect()?);
        info!(
            "event=repo_reconnect module=repo status=ok engine={} collection={}",
            self.engine.as_str(),
            self.collection
        );
        Ok(())
    }

    /// Returns whether the collection existed before the call, creating it
    /// when asked.
    pub fn collection_exists(&self, create_if_not_exists: bool) -> RepoResult<bool> {
        let backend = self.backend()?;
        let exists = backend.collection_exists(&self.collection)?;
        if !exists && create_if_not_exists {
            backend.create_collection(&self.collection)?;
        }
        Ok(exists)
    }

    /// Creates the collection and an index on every listed field.
    pub fn init_collection(&self, index_fields: &[&str]) -> RepoResult<()> {
        self.backend()?.create_collection(&self.collection)?;
        for field in index_fields {
            self.create_index(field)?;
        }
        Ok(())
    }

    /// Removes the collection with its records, overlay entries, attachments
    /// and index definitions.
    pub fn drop_collection(&self) -> RepoResult<()> {
        self.backend()?.drop_collection(&self.collection)?;
        info!(
            "event=collection_drop module=repo status=ok collection={}",
            self.collection
        );
        Ok(())
    }

    pub fn insert(&self, entity: &mut T) -> RepoResult<InsertResult> {
        self.insert_with(entity, InsertMode::default())
    }

    /// Inserts `entity`, resolving a live id conflict through `mode`.
    ///
    /// The assigned id and dates are written back into `entity`. A dead
    /// record (soft-deleted or expired) under the same id is purged first.
    pub fn insert_with(&self, entity: &mut T, mode: InsertMode) -> RepoResult<InsertResult> {
        let backend = self.backend()?;
        let now = utc_now();
        let mut kept_creation_date = None;

        if entity.meta().has_id() {
            let id = entity.meta().id.clone();
            match self.lookup(&id, now)? {
                Lookup::Live(existing) => match mode {
                    InsertMode::ErrorIfKeyExists => {
                        return Err(RepoError::DuplicateKey {
                            collection: self.collection.clone(),
                            id,
                        });
                    }
                    InsertMode::DoNothingIfKeyExists => {
                        self.log_insert(&id, mode, InsertResult::NotAffected);
                        return Ok(InsertResult::NotAffected);
                    }
                    InsertMode::EraseExisting => {
                        kept_creation_date = Some(existing.system_creation_date);
                        self.purge_record(&id)?;
                    }
                    InsertMode::DbImplementation => {
                        match backend.capabilities().native_insert {
                            NativeInsert::ReportDuplicate => {
                                self.log_insert(&id, mode, InsertResult::DuplicateKey);
                                return Ok(InsertResult::DuplicateKey);
                            }
                            NativeInsert::Upsert => {
                                self.write_fresh(entity, now, Some(existing.system_creation_date))?;
                                self.log_insert(&id, mode, InsertResult::Updated);
                                return Ok(InsertResult::Updated);
                            }
                        }
                    }
                },
                Lookup::Deleted(_) | Lookup::Expired(_) => self.purge_record(&id)?,
                Lookup::Absent => {}
            }
        } else {
            entity.meta_mut().id = new_entity_id();
        }

        self.write_fresh(entity, now, kept_creation_date)?;
        self.log_insert(entity.id(), mode, InsertResult::Inserted);
        Ok(InsertResult::Inserted)
    }

    pub fn insert_many(&self, entities: &mut [T]) -> RepoResult<BulkInsertResult> {
        self.insert_many_with(entities, InsertMode::DbImplementation)
    }

    /// Runs the insert state machine per entity. A failure is recorded for
    /// its id and does not undo earlier entities.
    pub fn insert_many_with(
        &self,
        entities: &mut [T],
        mode: InsertMode,
    ) -> RepoResult<BulkInsertResult> {
        self.backend()?;
        let mut result = BulkInsertResult::default();
        for entity in entities.iter_mut() {
            if !entity.meta().has_id() {
                entity.meta_mut().id = new_entity_id();
            }
            let outcome = match self.insert_with(entity, mode) {
                Ok(inserted) => BulkInsertEntry::Done(inserted),
                Err(err) => BulkInsertEntry::Failed(err),
            };
            result.entries.insert(entity.id().to_string(), outcome);
        }
        debug!(
            "event=entity_insert_many module=repo status=ok collection={} succeeded={} failed={}",
            self.collection,
            result.succeeded(),
            result.failed()
        );
        Ok(result)
    }

    pub fn update(&self, entity: &mut T) -> RepoResult<UpdateResult> {
        self.update_with(entity, UpdateMode::default())
    }

    /// Replaces the stored document of a live id, or resolves a missing id
    /// through `mode`.
    pub fn update_with(&self, entity: &mut T, mode: UpdateMode) -> RepoResult<UpdateResult> {
        let backend = self.backend()?;
        if !entity.meta().has_id() {
            return Err(RepoError::InvalidArgument(
                "update requires an entity with an id".to_string(),
            ));
        }
        let capabilities = backend.capabilities();
        if mode == UpdateMode::UpsertIfMissingKey && !capabilities.upsert_if_missing {
            return Err(RepoError::UnsupportedOperation(format!(
                "UpsertIfMissingKey on {} storage",
                self.engine.as_str()
            )));
        }

        let now = utc_now();
        let id = entity.meta().id.clone();
        let lookup = self.lookup(&id, now)?;
        if let Lookup::Live(_) = lookup {
            if self.auto_entity_dates {
                entity.meta_mut().system_last_update_date = now;
            }
            self.write_document(entity)?;
            self.expirations()?.reset(&id)?;
            self.log_update(&id, mode, UpdateResult::Updated);
            return Ok(UpdateResult::Updated);
        }

        let upsert = match mode {
            UpdateMode::ErrorIfMissingKey => {
                return Err(RepoError::KeyNotFound {
                    collection: self.collection.clone(),
                    id,
                });
            }
            UpdateMode::DoNothingIfMissingKey => false,
            UpdateMode::UpsertIfMissingKey => true,
            UpdateMode::DbImplementation => capabilities.native_update == NativeUpdate::Upsert,
        };
        if !upsert {
            self.log_update(&id, mode, UpdateResult::NotAffected);
            return Ok(UpdateResult::NotAffected);
        }

        if !matches!(lookup, Lookup::Absent) {
            self.purge_record(&id)?;
        }
        self.write_fresh(entity, now, None)?;
        self.log_update(&id, mode, UpdateResult::Inserted);
        Ok(UpdateResult::Inserted)
    }

    /// Physical delete.
    pub fn delete(&self, id: &str) -> RepoResult<u64> {
        self.delete_with(id, DeleteMode::Physical)
    }

    /// Deletes `id` and returns the number of records affected (0 or 1).
    ///
    /// Attachments are removed first on a best-effort basis. A logical delete
    /// only applies to live records and leaves the expiration entry and the
    /// update date untouched; a physical delete also removes dead records.
    pub fn delete_with(&self, id: &str, mode: DeleteMode) -> RepoResult<u64> {
        let backend = self.backend()?;
        let now = utc_now();
        let affected = match (self.lookup(id, now)?, mode) {
            (Lookup::Absent, _) => 0,
            (Lookup::Deleted(_) | Lookup::Expired(_), DeleteMode::Logical) => 0,
            (Lookup::Live(_) | Lookup::Expired(_) | Lookup::Deleted(_), DeleteMode::Physical) => {
                self.cascade_attachments(id);
                if !backend.delete_document(&self.collection, id)? {
                    return Err(RepoError::QueryNotAcknowledged("delete_document"));
                }
                self.expirations()?.clear(id)?;
                1
            }
            (Lookup::Live(mut document), DeleteMode::Logical) => {
                self.cascade_attachments(id);
                document.deleted = true;
                if let Value::Object(fields) = &mut document.body {
                    fields.insert("deleted".to_string(), Value::Bool(true));
                }
                backend.put_document(&self.collection, &document)?;
                1
            }
        };
        debug!(
            "event=entity_delete module=repo status=ok collection={} id={} mode={:?} affected={}",
            self.collection, id, mode, affected
        );
        Ok(affected)
    }

    pub fn get_by_id(&self, id: &str) -> RepoResult<T> {
        match self.lookup(id, utc_now())? {
            Lookup::Live(document) => self.decode(document),
            Lookup::Absent | Lookup::Deleted(_) | Lookup::Expired(_) => {
                Err(RepoError::KeyNotFound {
                    collection: self.collection.clone(),
                    id: id.to_string(),
                })
            }
        }
    }

    /// Like [`Self::get_by_id`], with an unreachable id reported as `None`.
    pub fn try_get_by_id(&self, id: &str) -> RepoResult<Option<T>> {
        match self.get_by_id(id) {
            Ok(entity) => Ok(Some(entity)),
            Err(err) if err.is_key_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Live entities for `ids` in request order; unreachable or repeated ids
    /// are skipped.
    pub fn get_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> RepoResult<Vec<T>> {
        let now = utc_now();
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if !seen.insert(id) {
                continue;
            }
            if let Lookup::Live(document) = self.lookup(id, now)? {
                entities.push(self.decode(document)?);
            }
        }
        Ok(entities)
    }

    /// Every live entity, ordered by id.
    pub fn get_all(&self) -> RepoResult<Vec<T>> {
        let backend = self.backend()?;
        let expired = self.expirations()?.expired_ids(utc_now())?;
        backend
            .enumerate_documents(&self.collection, false)?
            .into_iter()
            .filter(|document| !expired.contains(&document.id))
            .map(|document| self.decode(document))
            .collect()
    }

    pub fn exist(&self, id: &str) -> RepoResult<bool> {
        Ok(matches!(self.lookup(id, utc_now())?, Lookup::Live(_)))
    }

    /// Number of live entities.
    pub fn count(&self) -> RepoResult<u64> {
        let backend = self.backend()?;
        let expired = self.expirations()?.expired_ids(utc_now())?;
        let live = backend
            .document_ids(&self.collection, false)?
            .into_iter()
            .filter(|id| !expired.contains(id))
            .count();
        Ok(live as u64)
    }

    /// Reads a record in any state, for diagnostics.
    pub fn inspect(&self, id: &str) -> RepoResult<Option<InspectedEntity<T>>> {
        let (status, document) = match self.lookup(id, utc_now())? {
            Lookup::Absent => return Ok(None),
            Lookup::Deleted(document) => (EntityStatus::Deleted, document),
            Lookup::Expired(document) => (EntityStatus::Expired, document),
            Lookup::Live(document) => (EntityStatus::Live, document),
        };
        let expiration_date = self
            .expirations()?
            .entry(id)?
            .and_then(|entry| entry.expiration_date);
        Ok(Some(InspectedEntity {
            status,
            entity: self.decode(document)?,
            expiration_date,
        }))
    }

    /// Creates or overwrites the expiration entry of a stored record; `None`
    /// clears it, which also revives an expired record.
    pub fn expire_at(&self, id: &str, date: Option<DateTime<Utc>>) -> RepoResult<()> {
        if let Lookup::Absent = self.lookup(id, utc_now())? {
            return Err(RepoError::KeyNotFound {
                collection: self.collection.clone(),
                id: id.to_string(),
            });
        }
        self.expirations()?.set(id, date)?;
        debug!(
            "event=entity_expire module=repo status=ok collection={} id={} cleared={}",
            self.collection,
            id,
            date.is_none()
        );
        Ok(())
    }

    /// Stored expiration date of `id`, if any.
    pub fn expiration_of(&self, id: &str) -> RepoResult<Option<DateTime<Utc>>> {
        Ok(self
            .expirations()?
            .entry(id)?
            .and_then(|entry| entry.expiration_date))
    }

    /// Removes every record of the collection and returns how many were live.
    /// Index definitions survive.
    pub fn truncate_collection(&self) -> RepoResult<u64> {
        let live = self.count()?;
        let removed = self.backend()?.truncate_collection(&self.collection)?;
        info!(
            "event=collection_truncate module=repo status=ok collection={} live={} removed={}",
            self.collection, live, removed
        );
        Ok(live)
    }

    /// Purges soft-deleted records with their attachments and overlay
    /// entries, drops orphan overlay entries and blobs, then lets the engine
    /// reclaim space. Returns the number of records purged.
    ///
    /// Expired records are kept since clearing their expiration revives them.
    pub fn compact_database(&self) -> RepoResult<u64> {
        let backend = self.backend()?;
        let mut purged = 0_u64;
        for id in backend.document_ids(&self.collection, true)? {
            if let Lookup::Deleted(_) = self.lookup(&id, utc_now())? {
                self.purge_record(&id)?;
                purged += 1;
            }
        }
        let orphan_expirations = backend.purge_orphan_expirations(&self.collection)?;
        let orphan_blobs = backend.purge_orphan_blobs(&self.collection)?;
        backend.compact()?;
        info!(
            "event=db_compact module=repo status=ok collection={} purged={} orphan_expirations={} orphan_blobs={}",
            self.collection, purged, orphan_expirations, orphan_blobs
        );
        Ok(purged)
    }

    pub(crate) fn backend(&self) -> RepoResult<&C::Backend> {
        self.backend.as_ref().ok_or(RepoError::ConnectionClosed)
    }

    pub(crate) fn expirations(&self) -> RepoResult<ExpirationOverlay<'_, C::Backend>> {
        Ok(ExpirationOverlay::new(self.backend()?, &self.collection))
    }

    /// Resolves `id` in the fixed order absent, deleted, expired.
    pub(crate) fn lookup(&self, id: &str, now: DateTime<Utc>) -> RepoResult<Lookup> {
        let backend = self.backend()?;
        let Some(document) = backend.get_document(&self.collection, id)? else {
            return Ok(Lookup::Absent);
        };
        if document.deleted {
            return Ok(Lookup::Deleted(document));
        }
        if self.expirations()?.is_expired(id, now)? {
            return Ok(Lookup::Expired(document));
        }
        Ok(Lookup::Live(document))
    }

    /// Fails with `KeyNotFound` unless `id` is live.
    pub(crate) fn require_live(&self, id: &str) -> RepoResult<()> {
        match self.lookup(id, utc_now())? {
            Lookup::Live(_) => Ok(()),
            _ => Err(RepoError::KeyNotFound {
                collection: self.collection.clone(),
                id: id.to_string(),
            }),
        }
    }

    pub(crate) fn decode(&self, document: StoredDocument) -> RepoResult<T> {
        Ok(self
            .registry
            .decode(&document.discriminator, document.body)?)
    }

    /// Stamps insert dates, forces the record live and writes it with a
    /// reset expiration entry.
    fn write_fresh(
        &self,
        entity: &mut T,
        now: DateTime<Utc>,
        kept_creation_date: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        let meta = entity.meta_mut();
        meta.deleted = false;
        if self.auto_entity_dates {
            meta.system_creation_date = kept_creation_date.unwrap_or(now);
            meta.system_last_update_date = now;
        }
        self.write_document(entity)?;
        self.expirations()?.reset(entity.id())?;
        Ok(())
    }

    fn write_document(&self, entity: &T) -> RepoResult<()> {
        let body = serde_json::to_value(entity)?;
        if !body.is_object() {
            return Err(RepoError::InvalidArgument(format!(
                "entity `{}` must serialize to a JSON object",
                T::TYPE_NAME
            )));
        }
        let meta = entity.meta();
        let document = StoredDocument {
            id: meta.id.clone(),
            discriminator: entity.discriminator().into_owned(),
            deleted: meta.deleted,
            system_creation_date: meta.system_creation_date,
            system_last_update_date: meta.system_last_update_date,
            body,
        };
        self.backend()?.put_document(&self.collection, &document)?;
        Ok(())
    }

    /// Physically removes a record with its attachments and overlay entry.
    fn purge_record(&self, id: &str) -> RepoResult<()> {
        self.cascade_attachments(id);
        self.backend()?.delete_document(&self.collection, id)?;
        self.expirations()?.clear(id)?;
        Ok(())
    }

    /// Best-effort removal of every attachment of `id`.
    fn cascade_attachments(&self, id: &str) {
        let Ok(backend) = self.backend() else {
            return;
        };
        let names = match backend.list_blob_names(&self.collection, id) {
            Ok(names) => names,
            Err(err) => {
                warn!(
                    "event=attachment_cascade module=repo status=warn collection={} id={} error={}",
                    self.collection, id, err
                );
                return;
            }
        };
        for name in names {
            if let Err(err) = backend.delete_blob(&self.collection, id, &name) {
                warn!(
                    "event=attachment_cascade module=repo status=warn collection={} id={} error={}",
                    self.collection, id, err
                );
            }
        }
    }

    fn log_insert(&self, id: &str, mode: InsertMode, result: InsertResult) {
        debug!(
            "event=entity_insert module=repo status=ok collection={} id={} mode={:?} result={:?}",
            self.collection, id, mode, result
        );
    }

    fn log_update(&self, id: &str, mode: UpdateMode, result: UpdateResult) {
        debug!(
            "event=entity_update module=repo status=ok collection={} id={} mode={:?} result={:?}",
            self.collection, id, mode, result
        );
    }
}

fn validate_collection_name(name: &str) -> RepoResult<()> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(RepoError::InvalidArgument(format!(
            "invalid collection name `{name}`"
        )))
    }
}

/// Ids of `candidates` that are not in the expired set, keeping order.
pub(crate) fn without_expired(
    candidates: impl IntoIterator<Item = EntityId>,
    expired: &HashSet<EntityId>,
) -> Vec<EntityId> {
    candidates
        .into_iter()
        .filter(|id| !expired.contains(id))
        .collect()
}
