//! Named binary attachments scoped to an entity id.
//!
//! # Responsibility
//! - Store, read, list and remove blobs under `(collection, id, name)`.
//!
//! # Invariants
//! - Writes and reads require a live owner; a missing owner is `KeyNotFound`.
//! - A missing blob for a live owner is `AttachmentNotFound`.
//! - Blobs are not part of the entity document and are not ordered with
//!   respect to entity updates.

use crate::backend::{Backend, Connector, StoredBlob};
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::repository::Repository;
use log::debug;
use std::io::{Cursor, Read};

/// Attachment metadata without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDetail {
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

/// Readable attachment payload with its content type.
#[derive(Debug)]
pub struct AttachmentStream {
    content_type: String,
    content: Cursor<Vec<u8>>,
}

impl AttachmentStream {
    pub fn content_type(&self) -> &str {
        self.content_type.as_str()
    }

    /// Total payload size in bytes.
    pub fn len(&self) -> u64 {
        self.content.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.get_ref().is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.content.into_inner()
    }
}

impl Read for AttachmentStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Entity, C: Connector> Repository<T, C> {
    /// Stores the content of `reader` as attachment `name` of `id`,
    /// replacing any attachment with the same name.
    pub fn add_attachment(
        &self,
        id: &str,
        mut reader: impl Read,
        content_type: &str,
        name: &str,
    ) -> RepoResult<()> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        self.add_byte_attachment(id, content, content_type, name)
    }

    pub fn add_byte_attachment(
        &self,
        id: &str,
        content: impl Into<Vec<u8>>,
        content_type: &str,
        name: &str,
    ) -> RepoResult<()> {
        validate_attachment_name(name)?;
        self.require_live(id)?;
        let blob = StoredBlob {
            content_type: content_type.to_string(),
            content: content.into(),
        };
        self.backend()?
            .put_blob(self.collection_name(), id, name, &blob)?;
        debug!(
            "event=attachment_put module=repo status=ok collection={} id={} name={} size={}",
            self.collection_name(),
            id,
            name,
            blob.content.len()
        );
        Ok(())
    }

    pub fn get_attachment(&self, id: &str, name: &str) -> RepoResult<AttachmentStream> {
        self.require_live(id)?;
        let blob = self
            .backend()?
            .get_blob(self.collection_name(), id, name)?
            .ok_or_else(|| attachment_not_found(id, name))?;
        Ok(AttachmentStream {
            content_type: blob.content_type,
            content: Cursor::new(blob.content),
        })
    }

    /// Buffers the whole attachment in memory.
    pub fn get_byte_attachment(&self, id: &str, name: &str) -> RepoResult<Vec<u8>> {
        Ok(self.get_attachment(id, name)?.into_bytes())
    }

    pub fn get_attachment_detail(&self, id: &str, name: &str) -> RepoResult<AttachmentDetail> {
        self.require_live(id)?;
        let info = self
            .backend()?
            .blob_info(self.collection_name(), id, name)?
            .ok_or_else(|| attachment_not_found(id, name))?;
        Ok(AttachmentDetail {
            name: name.to_string(),
            content_type: info.content_type,
            size: info.size,
        })
    }

    pub fn remove_attachment(&self, id: &str, name: &str) -> RepoResult<()> {
        self.require_live(id)?;
        if !self
            .backend()?
            .delete_blob(self.collection_name(), id, name)?
        {
            return Err(attachment_not_found(id, name));
        }
        debug!(
            "event=attachment_remove module=repo status=ok collection={} id={} name={}",
            self.collection_name(),
            id,
            name
        );
        Ok(())
    }

    /// Names stored for `id`; empty when there are none. Order is not
    /// guaranteed across engines.
    pub fn get_attachment_names(&self, id: &str) -> RepoResult<Vec<String>> {
        Ok(self
            .backend()?
            .list_blob_names(self.collection_name(), id)?)
    }
}

fn validate_attachment_name(name: &str) -> RepoResult<()> {
    if name.trim().is_empty() {
        return Err(RepoError::InvalidArgument(
            "attachment name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn attachment_not_found(id: &str, name: &str) -> RepoError {
    RepoError::AttachmentNotFound {
        id: id.to_string(),
        name: name.to_string(),
    }
}
