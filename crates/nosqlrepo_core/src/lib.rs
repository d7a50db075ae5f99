//! Storage-agnostic repository layer for typed entities.
//!
//! One consistency contract (id assignment, insert/update modes, soft
//! delete, expiration, attachments, field queries and polymorphic decoding)
//! enforced identically over every storage adapter.

pub mod backend;
pub mod db;
pub mod logging;
pub mod model;
pub mod naming;
pub mod repo;

pub use backend::memory::{MemoryBackend, MemoryConnector};
pub use backend::sqlite::{CollectionStats, SqliteBackend, SqliteConnector};
pub use backend::{
    Backend, BackendCapabilities, BackendError, BackendResult, Connector, EngineKind,
    NativeInsert, NativeUpdate,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{new_entity_id, Entity, EntityId, EntityMeta};
pub use model::expiration::ExpirationEntry;
pub use repo::{
    AttachmentDetail, AttachmentStream, BulkInsertEntry, BulkInsertResult, DeleteMode,
    EntityStatus, InsertMode, InsertResult, InspectedEntity, ListQuery, RepoError, RepoResult,
    Repository, RepositoryOptions, TypeRegistry, UpdateMode, UpdateResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
