//! Expiration overlay over one collection.
//!
//! # Responsibility
//! - Read and write expiry entries kept apart from the entity documents.
//! - Answer "is this id expired now" for every read path.
//!
//! # Invariants
//! - Writes here never touch the entity document or its `deleted` flag.
//! - Dates are truncated to microseconds before storage so every adapter
//!   round-trips them identically.

use crate::backend::{Backend, BackendResult};
use crate::model::entity::EntityId;
use crate::model::expiration::ExpirationEntry;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashSet;

/// Current UTC time at the precision every adapter stores.
pub(crate) fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Borrowed view of the expiration entries of one collection.
pub(crate) struct ExpirationOverlay<'a, B: Backend> {
    backend: &'a B,
    collection: &'a str,
}

impl<'a, B: Backend> ExpirationOverlay<'a, B> {
    pub(crate) fn new(backend: &'a B, collection: &'a str) -> Self {
        Self {
            backend,
            collection,
        }
    }

    pub(crate) fn entry(&self, id: &str) -> BackendResult<Option<ExpirationEntry>> {
        self.backend.get_expiration(self.collection, id)
    }

    pub(crate) fn is_expired(&self, id: &str, now: DateTime<Utc>) -> BackendResult<bool> {
        Ok(self
            .entry(id)?
            .is_some_and(|entry| entry.is_expired_at(now)))
    }

    /// Creates or overwrites the entry; `None` means never expires.
    pub(crate) fn set(&self, id: &str, date: Option<DateTime<Utc>>) -> BackendResult<()> {
        let entry = ExpirationEntry::new(id, date.map(|date| date.trunc_subsecs(6)));
        self.backend.put_expiration(self.collection, &entry)
    }

    /// Resets the entry to "never expires".
    pub(crate) fn reset(&self, id: &str) -> BackendResult<()> {
        self.set(id, None)
    }

    pub(crate) fn clear(&self, id: &str) -> BackendResult<bool> {
        self.backend.delete_expiration(self.collection, id)
    }

    pub(crate) fn expired_ids(&self, now: DateTime<Utc>) -> BackendResult<HashSet<EntityId>> {
        self.backend.expired_ids(self.collection, now)
    }
}
