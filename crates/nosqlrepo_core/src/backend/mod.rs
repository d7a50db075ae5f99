//! Storage adapter contract consumed by the repository core.
//!
//! # Responsibility
//! - Define the narrow capability set a storage engine must provide:
//!   raw documents, expiration entries, named blobs and optional
//!   secondary indices.
//! - Define how a connection is (re-)acquired from construction parameters.
//!
//! # Invariants
//! - Adapters never interpret entity semantics (liveness, expiry, modes);
//!   that is the repository core's job.
//! - `put_document` is a storage-level upsert keyed by `(collection, id)`.
//! - Adapters do not retry; transient failures surface as `BackendError`.
//! - Check-then-act sequences issued by the core are not atomic across
//!   calls. Adapters shared between processes expose that race window.

use crate::db::DbError;
use crate::model::entity::EntityId;
use crate::model::expiration::ExpirationEntry;
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;
pub mod sqlite;

pub type BackendResult<T> = Result<T, BackendError>;

/// Error raised by a storage adapter.
#[derive(Debug)]
pub enum BackendError {
    Db(DbError),
    Serialization(serde_json::Error),
    /// Persisted state cannot be converted back into a document.
    InvalidData(String),
    /// The engine accepted a write but did not confirm it.
    NotAcknowledged(&'static str),
    /// The adapter does not implement the requested capability.
    Unsupported(&'static str),
    LockPoisoned,
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::NotAcknowledged(operation) => {
                write!(f, "storage did not acknowledge `{operation}`")
            }
            Self::Unsupported(capability) => {
                write!(f, "storage adapter does not support {capability}")
            }
            Self::LockPoisoned => write!(f, "storage lock poisoned by a panicked writer"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::NotAcknowledged(_) => None,
            Self::Unsupported(_) => None,
            Self::LockPoisoned => None,
        }
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Storage engine family behind a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Embedded file-based store.
    Sqlite,
    /// In-process document store.
    Memory,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

/// Engine-native behavior for `InsertMode::DbImplementation` against a live id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeInsert {
    /// Replace the payload, keep the stored creation date, report `Updated`.
    Upsert,
    /// Leave the stored record alone and report `DuplicateKey` without failing.
    ReportDuplicate,
}

/// Engine-native behavior for `UpdateMode::DbImplementation` on a missing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeUpdate {
    /// Replace only when present; a missing id reports `NotAffected`.
    ReplaceIfPresent,
    /// Insert the entity when the id is missing.
    Upsert,
}

/// What an adapter can do beyond the mandatory document/blob contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub native_insert: NativeInsert,
    pub native_update: NativeUpdate,
    /// Whether `UpdateMode::UpsertIfMissingKey` is allowed.
    pub upsert_if_missing: bool,
    /// Whether field indices can be created and queried.
    pub secondary_indexes: bool,
}

/// Raw document as held by an adapter.
///
/// Metadata columns mirror the entity fields so adapters can filter without
/// parsing `body`; `body` is the full serialized entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: EntityId,
    /// Concrete type tag recorded at write time.
    pub discriminator: String,
    pub deleted: bool,
    pub system_creation_date: DateTime<Utc>,
    pub system_last_update_date: DateTime<Utc>,
    pub body: Value,
}

/// Named binary payload attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Blob metadata without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub content_type: String,
    pub size: u64,
}

/// Capability interface every storage engine implements.
pub trait Backend {
    fn engine(&self) -> EngineKind;

    fn database_name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    fn collection_exists(&self, collection: &str) -> BackendResult<bool>;

    fn create_collection(&self, collection: &str) -> BackendResult<()>;

    /// Removes documents, expiration entries and blobs; keeps index
    /// definitions. Returns the number of documents removed.
    fn truncate_collection(&self, collection: &str) -> BackendResult<u64>;

    /// Removes the collection including its index definitions.
    fn drop_collection(&self, collection: &str) -> BackendResult<()>;

    fn get_document(&self, collection: &str, id: &str) -> BackendResult<Option<StoredDocument>>;

    fn put_document(&self, collection: &str, document: &StoredDocument) -> BackendResult<()>;

    /// Returns whether a document was removed.
    fn delete_document(&self, collection: &str, id: &str) -> BackendResult<bool>;

    /// Documents ordered by id.
    fn enumerate_documents(
        &self,
        collection: &str,
        include_deleted: bool,
    ) -> BackendResult<Vec<StoredDocument>>;

    /// Ids ordered ascending, without loading payloads.
    fn document_ids(&self, collection: &str, include_deleted: bool) -> BackendResult<Vec<EntityId>>;

    fn get_expiration(&self, collection: &str, id: &str) -> BackendResult<Option<ExpirationEntry>>;

    fn put_expiration(&self, collection: &str, entry: &ExpirationEntry) -> BackendResult<()>;

    fn delete_expiration(&self, collection: &str, id: &str) -> BackendResult<bool>;

    /// Ids whose expiration date is at or before `now`.
    fn expired_ids(&self, collection: &str, now: DateTime<Utc>) -> BackendResult<HashSet<EntityId>>;

    fn get_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<Option<StoredBlob>>;

    /// Blob metadata; adapters that can avoid loading the payload should.
    fn blob_info(&self, collection: &str, id: &str, name: &str) -> BackendResult<Option<BlobInfo>> {
        Ok(self.get_blob(collection, id, name)?.map(|blob| BlobInfo {
            size: blob.content.len() as u64,
            content_type: blob.content_type,
        }))
    }

    fn put_blob(&self, collection: &str, id: &str, name: &str, blob: &StoredBlob)
        -> BackendResult<()>;

    fn delete_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<bool>;

    fn list_blob_names(&self, collection: &str, id: &str) -> BackendResult<Vec<String>>;

    /// Removes expiration entries whose document no longer exists.
    fn purge_orphan_expirations(&self, collection: &str) -> BackendResult<u64>;

    /// Removes blobs whose owning document no longer exists.
    fn purge_orphan_blobs(&self, collection: &str) -> BackendResult<u64>;

    fn create_index(&self, _collection: &str, _field: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported("secondary indexes"))
    }

    fn has_index(&self, _collection: &str, _field: &str) -> BackendResult<bool> {
        Ok(false)
    }

    /// Ids of non-deleted documents whose `field` equals `value`, or contains
    /// it when the field holds an array.
    fn lookup_by_index(
        &self,
        _collection: &str,
        _field: &str,
        _value: &Value,
    ) -> BackendResult<Vec<EntityId>> {
        Err(BackendError::Unsupported("secondary indexes"))
    }

    /// Reclaims storage freed by removed records. Must not change results.
    fn compact(&self) -> BackendResult<()>;

    /// Releases the underlying handles.
    fn close(self) -> BackendResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Construction parameters able to (re-)acquire a backend connection.
pub trait Connector {
    type Backend: Backend;

    fn connect(&self) -> BackendResult<Self::Backend>;
}

/// Normalizes a scalar JSON value into a comparable index key.
///
/// Booleans compare as integers and numbers compare numerically, which
/// matches SQLite's comparison of JSON values. Integral numbers keep their
/// exact `i64` value so keys above 2^53 stay distinct.
pub fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(flag) => Some(format!("int:{}", i64::from(*flag))),
        Value::Number(number) => number_key(number),
        Value::String(text) => Some(format!("str:{text}")),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn number_key(number: &Number) -> Option<String> {
    if let Some(integer) = number.as_i64() {
        return Some(format!("int:{integer}"));
    }
    // Integers beyond i64 are stored as reals by SQLite.
    let real = number.as_f64()?;
    if real.fract() == 0.0 && real >= i64::MIN as f64 && real < i64::MAX as f64 {
        Some(format!("int:{}", real as i64))
    } else {
        Some(format!("num:{real}"))
    }
}

/// Resolves a dotted field path against a document body.
pub fn field_value<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(body, |current, segment| current.get(segment))
}

/// Index keys emitted by a document for `field`: one per array element, or
/// one for a scalar.
pub fn index_keys(body: &Value, field: &str) -> Vec<String> {
    match field_value(body, field) {
        Some(Value::Array(items)) => items.iter().filter_map(index_key).collect(),
        Some(value) => index_key(value).into_iter().collect(),
        None => Vec::new(),
    }
}
