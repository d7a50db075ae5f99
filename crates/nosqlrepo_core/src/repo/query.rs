//! Field-indexed lookups and list queries.
//!
//! # Responsibility
//! - Create secondary indices and answer exact-match field queries.
//! - Provide paged enumeration, including the administrative path over
//!   soft-deleted records.
//!
//! # Invariants
//! - Field queries fail with `IndexNotFound` unless the field was indexed
//!   beforehand.
//! - Field query results contain only live entities.
//! - Set lookups de-duplicate by id; the first matched value wins. Order
//!   across values follows the request, order within one value follows the
//!   engine.

use crate::backend::{Backend, Connector};
use crate::model::entity::{Entity, EntityId};
use crate::naming::is_valid_field_name;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::expiration::utc_now;
use crate::repo::repository::{without_expired, Repository};
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Enumeration options for [`Repository::do_query`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Also return soft-deleted records.
    pub include_deleted: bool,
    /// Also return records whose expiration date has passed.
    pub include_expired: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl<T: Entity, C: Connector> Repository<T, C> {
    /// Creates a secondary index on `field` (dotted paths allowed).
    pub fn create_index(&self, field: &str) -> RepoResult<()> {
        validate_field_name(field)?;
        let backend = self.backend()?;
        if !backend.capabilities().secondary_indexes {
            return Err(RepoError::UnsupportedOperation(format!(
                "secondary indexes on {} storage",
                self.engine().as_str()
            )));
        }
        backend.create_index(self.collection_name(), field)?;
        info!(
            "event=index_create module=repo status=ok collection={} field={}",
            self.collection_name(),
            field
        );
        Ok(())
    }

    pub fn has_index(&self, field: &str) -> RepoResult<bool> {
        Ok(self.backend()?.has_index(self.collection_name(), field)?)
    }

    /// Live entities whose `field` equals `value`, or contains it when the
    /// field holds an array.
    pub fn get_by_field<V: Serialize>(&self, field: &str, value: V) -> RepoResult<Vec<T>> {
        let ids = self.get_key_by_field(field, value)?;
        self.load_live(ids)
    }

    /// Union of [`Self::get_by_field`] over `values`, de-duplicated by id.
    pub fn get_by_field_values<V: Serialize>(
        &self,
        field: &str,
        values: &[V],
    ) -> RepoResult<Vec<T>> {
        let ids = self.get_key_by_field_values(field, values)?;
        self.load_live(ids)
    }

    /// Ids only; no entity is decoded.
    pub fn get_key_by_field<V: Serialize>(
        &self,
        field: &str,
        value: V,
    ) -> RepoResult<Vec<EntityId>> {
        self.matching_ids(field, vec![to_scalar(value)?])
    }

    pub fn get_key_by_field_values<V: Serialize>(
        &self,
        field: &str,
        values: &[V],
    ) -> RepoResult<Vec<EntityId>> {
        let scalars = values
            .iter()
            .map(to_scalar)
            .collect::<RepoResult<Vec<_>>>()?;
        self.matching_ids(field, scalars)
    }

    /// Paged enumeration ordered by id, with an optional post-filter applied
    /// before paging.
    pub fn do_query(
        &self,
        query: &ListQuery,
        filter: impl Fn(&T) -> bool,
    ) -> RepoResult<Vec<T>> {
        let backend = self.backend()?;
        let expired = if query.include_expired {
            HashSet::new()
        } else {
            self.expirations()?.expired_ids(utc_now())?
        };

        let documents =
            backend.enumerate_documents(self.collection_name(), query.include_deleted)?;
        let mut entities = Vec::new();
        for document in documents {
            if expired.contains(&document.id) {
                continue;
            }
            let entity = self.decode(document)?;
            if filter(&entity) {
                entities.push(entity);
            }
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(entities
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect())
    }

    fn matching_ids(&self, field: &str, values: Vec<Value>) -> RepoResult<Vec<EntityId>> {
        validate_field_name(field)?;
        let backend = self.backend()?;
        let collection = self.collection_name();
        if !backend.has_index(collection, field)? {
            return Err(RepoError::IndexNotFound {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for value in &values {
            for id in backend.lookup_by_index(collection, field, value)? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }

        let expired = self.expirations()?.expired_ids(utc_now())?;
        let ids = without_expired(ids, &expired);
        debug!(
            "event=field_query module=repo status=ok collection={} field={} values={} hits={}",
            collection,
            field,
            values.len(),
            ids.len()
        );
        Ok(ids)
    }

    fn load_live(&self, ids: Vec<EntityId>) -> RepoResult<Vec<T>> {
        let backend = self.backend()?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            match backend.get_document(self.collection_name(), &id)? {
                Some(document) if !document.deleted => entities.push(self.decode(document)?),
                _ => {}
            }
        }
        Ok(entities)
    }
}

fn validate_field_name(field: &str) -> RepoResult<()> {
    if is_valid_field_name(field) {
        Ok(())
    } else {
        Err(RepoError::InvalidArgument(format!(
            "invalid field path `{field}`"
        )))
    }
}

fn to_scalar<V: Serialize>(value: V) -> RepoResult<Value> {
    let value = serde_json::to_value(value)?;
    match value {
        Value::Array(_) | Value::Object(_) => Err(RepoError::InvalidArgument(
            "field queries take scalar values".to_string(),
        )),
        scalar => Ok(scalar),
    }
}
