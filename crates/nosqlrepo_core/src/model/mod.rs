//! Entity model for repository-managed values.
//!
//! # Responsibility
//! - Define canonical metadata carried by every stored entity.
//! - Keep the entity contract independent from any storage engine.
//!
//! # Invariants
//! - Every entity is identified by a string id unique within its collection.
//! - Deletion is represented by a soft-delete tombstone until purged.

pub mod entity;
pub mod expiration;
