//! Repository error taxonomy.
//!
//! # Invariants
//! - Every kind is programmatically distinguishable by matching on
//!   [`RepoError`].
//! - Backend failures are wrapped and surfaced, never retried.

use crate::backend::BackendError;
use crate::model::entity::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error raised by repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Id absent, soft-deleted or expired on an operation requiring existence.
    KeyNotFound { collection: String, id: EntityId },
    /// Insert with `ErrorIfKeyExists` against a live id.
    DuplicateKey { collection: String, id: EntityId },
    /// Named blob absent for an existing entity.
    AttachmentNotFound { id: EntityId, name: String },
    /// Field query issued without a prior index.
    IndexNotFound { collection: String, field: String },
    /// Storage accepted a write but did not confirm it.
    QueryNotAcknowledged(&'static str),
    /// Mode or feature the current adapter does not implement.
    UnsupportedOperation(String),
    InvalidArgument(String),
    /// Called between `close` and `connect_again`.
    ConnectionClosed,
    Serialization(serde_json::Error),
    Io(std::io::Error),
    Backend(BackendError),
}

impl RepoError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyNotFound { collection, id } => {
                write!(f, "key `{id}` not found in collection `{collection}`")
            }
            Self::DuplicateKey { collection, id } => {
                write!(f, "key `{id}` already exists in collection `{collection}`")
            }
            Self::AttachmentNotFound { id, name } => {
                write!(f, "attachment `{name}` not found for `{id}`")
            }
            Self::IndexNotFound { collection, field } => {
                write!(f, "no index on field `{field}` in collection `{collection}`")
            }
            Self::QueryNotAcknowledged(operation) => {
                write!(f, "storage did not acknowledge `{operation}`")
            }
            Self::UnsupportedOperation(what) => write!(f, "unsupported operation: {what}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::ConnectionClosed => write!(f, "repository connection is closed"),
            Self::Serialization(err) => write!(f, "entity serialization failed: {err}"),
            Self::Io(err) => write!(f, "attachment stream error: {err}"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for RepoError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::NotAcknowledged(operation) => Self::QueryNotAcknowledged(operation),
            BackendError::Unsupported(capability) => {
                Self::UnsupportedOperation(capability.to_string())
            }
            other => Self::Backend(other),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<std::io::Error> for RepoError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
