//! Write modes and write results.

use crate::model::entity::EntityId;
use crate::repo::error::RepoError;
use std::collections::BTreeMap;

/// Conflict policy for insert when the id already resolves to a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Fail with `DuplicateKey`.
    #[default]
    ErrorIfKeyExists,
    /// Keep the prior creation date, drop the prior record, insert fresh.
    EraseExisting,
    /// Report `NotAffected` without side effects.
    DoNothingIfKeyExists,
    /// Engine-native behavior, see `BackendCapabilities::native_insert`.
    DbImplementation,
}

/// Policy for update when the id does not resolve to a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Fail with `KeyNotFound`.
    ErrorIfMissingKey,
    /// Report `NotAffected` without side effects.
    DoNothingIfMissingKey,
    /// Insert instead. Requires `BackendCapabilities::upsert_if_missing`.
    UpsertIfMissingKey,
    /// Engine-native behavior, see `BackendCapabilities::native_update`.
    #[default]
    DbImplementation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Remove the document and its expiration entry.
    #[default]
    Physical,
    /// Mark the document deleted and keep it addressable for diagnostics.
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Native upsert replaced a live record.
    Updated,
    NotAffected,
    /// Native engine reported a duplicate without failing.
    DuplicateKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Updated,
    /// Missing id was inserted by an upserting mode.
    Inserted,
    NotAffected,
}

/// Outcome of one entity in a bulk insert.
#[derive(Debug)]
pub enum BulkInsertEntry {
    Done(InsertResult),
    Failed(RepoError),
}

impl BulkInsertEntry {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Per-id outcome of a bulk insert. Entities are processed independently, so
/// earlier successes stay committed when a later entity fails.
#[derive(Debug, Default)]
pub struct BulkInsertResult {
    pub entries: BTreeMap<EntityId, BulkInsertEntry>,
}

impl BulkInsertResult {
    pub fn get(&self, id: &str) -> Option<&BulkInsertEntry> {
        self.entries.get(id)
    }

    pub fn succeeded(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }
}
