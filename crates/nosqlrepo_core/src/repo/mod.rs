//! Repository layer over pluggable storage adapters.
//!
//! # Responsibility
//! - Enforce one consistency contract for every engine: id assignment,
//!   insert/update modes, soft delete, expiration, attachments and field
//!   queries.
//! - Reconstruct concrete entity shapes through the type registry.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`KeyNotFound`, `DuplicateKey`,
//!   ...) in addition to wrapped storage errors.
//! - Nothing in this layer retries.

pub mod attachment;
pub mod error;
mod expiration;
pub mod modes;
pub mod polymorphic;
pub mod query;
pub mod repository;

pub use attachment::{AttachmentDetail, AttachmentStream};
pub use error::{RepoError, RepoResult};
pub use modes::{
    BulkInsertEntry, BulkInsertResult, DeleteMode, InsertMode, InsertResult, UpdateMode,
    UpdateResult,
};
pub use polymorphic::TypeRegistry;
pub use query::ListQuery;
pub use repository::{EntityStatus, InspectedEntity, Repository, RepositoryOptions};
