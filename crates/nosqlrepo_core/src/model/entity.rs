//! Entity model shared by every repository.
//!
//! # Responsibility
//! - Define the metadata block every stored value carries.
//! - Define the `Entity` contract the repository core relies on.
//!
//! # Invariants
//! - `id` is empty until the repository assigns one on insert.
//! - Metadata field names round-trip as `id`, `deleted`,
//!   `systemCreationDate` and `systemLastUpdateDate`.
//! - `deleted` is the source of truth for tombstone state.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;

/// Stable identifier of an entity inside one collection.
pub type EntityId = String;

/// Identity, tombstone and audit fields embedded in every entity.
///
/// Entities embed this block with `#[serde(flatten)]` so the fields appear at
/// the top level of the stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    /// Empty until assigned by insert.
    #[serde(default)]
    pub id: EntityId,
    /// Soft delete tombstone.
    #[serde(default)]
    pub deleted: bool,
    pub system_creation_date: DateTime<Utc>,
    pub system_last_update_date: DateTime<Utc>,
}

impl EntityMeta {
    /// Creates metadata with an empty id and both dates set to now.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            deleted: false,
            system_creation_date: now,
            system_last_update_date: now,
        }
    }

    /// Creates metadata with a caller-provided id.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            ..Self::new()
        }
    }

    /// Returns whether an id has been assigned.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract every value stored through a repository must satisfy.
///
/// Implementors serialize to a JSON object whose top level carries the
/// [`EntityMeta`] fields.
pub trait Entity: Serialize + DeserializeOwned {
    /// Default collection name and default discriminator.
    const TYPE_NAME: &'static str;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Concrete type tag recorded with the payload on every write.
    ///
    /// Base types that wrap several concrete shapes (usually an enum) should
    /// return the tag registered for the active variant.
    fn discriminator(&self) -> Cow<'static, str> {
        Cow::Borrowed(Self::TYPE_NAME)
    }

    fn id(&self) -> &str {
        self.meta().id.as_str()
    }

    fn is_deleted(&self) -> bool {
        self.meta().deleted
    }
}

/// Generates a new collision-resistant entity id.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::{new_entity_id, EntityMeta};
    use serde_json::json;

    #[test]
    fn meta_serializes_with_stable_field_names() {
        let meta = EntityMeta::with_id("abc");
        let value = serde_json::to_value(&meta).unwrap();

        assert_eq!(value["id"], json!("abc"));
        assert_eq!(value["deleted"], json!(false));
        assert!(value.get("systemCreationDate").is_some());
        assert!(value.get("systemLastUpdateDate").is_some());
    }

    #[test]
    fn meta_roundtrip_is_lossless() {
        let meta = EntityMeta::with_id("abc");
        let text = serde_json::to_string(&meta).unwrap();
        let back: EntityMeta = serde_json::from_str(&text).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_entity_id(), new_entity_id());
        assert!(!new_entity_id().is_empty());
    }
}
