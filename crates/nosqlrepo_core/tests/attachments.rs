#[macro_use]
mod common;

use common::{with_id, Note};
use nosqlrepo_core::{Connector, DeleteMode, RepoError, Repository};
use std::io::Read;

fn attachment_roundtrips_bytes_and_content_type<C: Connector>(repo: Repository<Note, C>) {
    let mut owner = with_id("owner", "owner");
    repo.insert(&mut owner).unwrap();

    let payload: Vec<u8> = (0..=255).collect();
    repo.add_attachment("owner", payload.as_slice(), "application/octet-stream", "bin")
        .unwrap();

    let mut stream = repo.get_attachment("owner", "bin").unwrap();
    assert_eq!(stream.content_type(), "application/octet-stream");
    assert_eq!(stream.len(), 256);
    let mut read_back = Vec::new();
    stream.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, payload);

    assert_eq!(repo.get_byte_attachment("owner", "bin").unwrap(), payload);
}

fn same_name_overwrites_silently<C: Connector>(repo: Repository<Note, C>) {
    let mut owner = with_id("owner", "owner");
    repo.insert(&mut owner).unwrap();

    repo.add_byte_attachment("owner", b"one".to_vec(), "text/plain", "note.txt")
        .unwrap();
    repo.add_byte_attachment("owner", b"{}".to_vec(), "application/json", "note.txt")
        .unwrap();

    let detail = repo.get_attachment_detail("owner", "note.txt").unwrap();
    assert_eq!(detail.content_type, "application/json");
    assert_eq!(detail.size, 2);
    assert_eq!(repo.get_attachment_names("owner").unwrap(), vec!["note.txt"]);
}

fn removed_attachment_is_not_found<C: Connector>(repo: Repository<Note, C>) {
    let mut owner = with_id("owner", "owner");
    repo.insert(&mut owner).unwrap();
    repo.add_byte_attachment("owner", b"x".to_vec(), "text/plain", "x")
        .unwrap();

    repo.remove_attachment("owner", "x").unwrap();

    let err = repo.get_attachment("owner", "x").unwrap_err();
    assert!(matches!(err, RepoError::AttachmentNotFound { ref name, .. } if name == "x"));
    let err = repo.remove_attachment("owner", "x").unwrap_err();
    assert!(matches!(err, RepoError::AttachmentNotFound { .. }));
    let err = repo.get_attachment_detail("owner", "x").unwrap_err();
    assert!(matches!(err, RepoError::AttachmentNotFound { .. }));
}

fn writes_and_reads_require_an_owner<C: Connector>(repo: Repository<Note, C>) {
    let err = repo
        .add_byte_attachment("nobody", b"x".to_vec(), "text/plain", "x")
        .unwrap_err();
    assert!(err.is_key_not_found());
    let err = repo.get_attachment("nobody", "x").unwrap_err();
    assert!(err.is_key_not_found());
    assert!(repo.get_attachment_names("nobody").unwrap().is_empty());
}

fn names_list_every_attachment_of_one_owner<C: Connector>(repo: Repository<Note, C>) {
    let mut first = with_id("first", "first");
    let mut second = with_id("second", "second");
    repo.insert(&mut first).unwrap();
    repo.insert(&mut second).unwrap();
    assert!(repo.get_attachment_names("first").unwrap().is_empty());

    for name in ["b", "a", "c"] {
        repo.add_byte_attachment("first", name.as_bytes().to_vec(), "text/plain", name)
            .unwrap();
    }
    repo.add_byte_attachment("second", b"z".to_vec(), "text/plain", "z")
        .unwrap();

    let mut names = repo.get_attachment_names("first").unwrap();
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
}

fn soft_delete_cascades_attachments<C: Connector>(repo: Repository<Note, C>) {
    let mut owner = with_id("owner", "owner");
    repo.insert(&mut owner).unwrap();
    repo.add_byte_attachment("owner", b"x".to_vec(), "text/plain", "x")
        .unwrap();

    repo.delete_with("owner", DeleteMode::Logical).unwrap();
    assert!(repo.get_attachment_names("owner").unwrap().is_empty());
}

fn empty_attachment_names_are_rejected<C: Connector>(repo: Repository<Note, C>) {
    let mut owner = with_id("owner", "owner");
    repo.insert(&mut owner).unwrap();
    let err = repo
        .add_byte_attachment("owner", b"x".to_vec(), "text/plain", " ")
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

on_every_engine!(
    attachment_roundtrips_bytes_and_content_type,
    same_name_overwrites_silently,
    removed_attachment_is_not_found,
    writes_and_reads_require_an_owner,
    names_list_every_attachment_of_one_owner,
    soft_delete_cascades_attachments,
    empty_attachment_names_are_rejected,
);
