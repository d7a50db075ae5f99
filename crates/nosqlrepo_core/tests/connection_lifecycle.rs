#[macro_use]
mod common;

use common::{with_id, Note};
use nosqlrepo_core::{
    Connector, DeleteMode, EngineKind, MemoryConnector, RepoError, Repository, SqliteConnector,
};

fn closed_repository_rejects_every_call<C: Connector>(mut repo: Repository<Note, C>) {
    let mut entity = with_id("n1", "before close");
    repo.insert(&mut entity).unwrap();

    repo.close().unwrap();
    assert!(!repo.is_open());
    repo.close().unwrap();

    assert!(matches!(repo.get_by_id("n1"), Err(RepoError::ConnectionClosed)));
    assert!(matches!(repo.exist("n1"), Err(RepoError::ConnectionClosed)));
    assert!(matches!(repo.count(), Err(RepoError::ConnectionClosed)));
    assert!(matches!(
        repo.insert(&mut with_id("n2", "while closed")),
        Err(RepoError::ConnectionClosed)
    ));
    assert!(matches!(
        repo.get_attachment_names("n1"),
        Err(RepoError::ConnectionClosed)
    ));
    assert!(matches!(
        repo.create_index("title"),
        Err(RepoError::ConnectionClosed)
    ));

    repo.connect_again().unwrap();
    assert!(repo.is_open());
    repo.insert(&mut with_id("n2", "after reconnect")).unwrap();
    assert!(repo.exist("n2").unwrap());
}

fn connect_again_on_open_repository_replaces_the_connection<C: Connector>(
    mut repo: Repository<Note, C>,
) {
    repo.connect_again().unwrap();
    repo.connect_again().unwrap();
    assert!(repo.is_open());
    assert_eq!(repo.count().unwrap(), 0);
}

on_every_engine!(
    closed_repository_rejects_every_call,
    connect_again_on_open_repository_replaces_the_connection,
);

#[test]
fn sqlite_file_data_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    let mut repo: Repository<Note, _> = Repository::open(SqliteConnector::file(&path)).unwrap();
    assert_eq!(repo.engine(), EngineKind::Sqlite);
    assert_eq!(repo.database_name(), "notes");

    let mut entity = with_id("n1", "durable");
    repo.insert(&mut entity).unwrap();
    repo.add_byte_attachment("n1", b"blob".to_vec(), "text/plain", "b")
        .unwrap();
    repo.close().unwrap();
    repo.connect_again().unwrap();

    assert_eq!(repo.get_by_id("n1").unwrap(), entity);
    assert_eq!(repo.get_byte_attachment("n1", "b").unwrap(), b"blob".to_vec());
}

#[test]
fn memory_data_is_shared_across_reconnects_and_repositories() {
    let connector = MemoryConnector::new("shared");
    let mut first: Repository<Note, _> = Repository::open(connector.clone()).unwrap();
    assert_eq!(first.engine(), EngineKind::Memory);
    assert_eq!(first.database_name(), "shared");

    let mut entity = with_id("n1", "shared");
    first.insert(&mut entity).unwrap();

    let second: Repository<Note, _> = Repository::open(connector).unwrap();
    assert_eq!(second.get_by_id("n1").unwrap(), entity);

    first.close().unwrap();
    first.connect_again().unwrap();
    assert!(first.exist("n1").unwrap());
}

#[test]
fn sqlite_collection_stats_count_each_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.db");
    let mut repo: Repository<Note, _> = Repository::open(SqliteConnector::file(&path)).unwrap();
    for id in ["a", "b", "c"] {
        repo.insert(&mut with_id(id, id)).unwrap();
    }
    repo.add_byte_attachment("a", b"x".to_vec(), "text/plain", "x")
        .unwrap();
    repo.delete_with("c", DeleteMode::Logical).unwrap();
    repo.close().unwrap();

    let backend = SqliteConnector::file(&path).connect().unwrap();
    let stats = backend.collection_stats().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name, "Note");
    assert_eq!(stats[0].active_documents, 2);
    assert_eq!(stats[0].deleted_documents, 1);
    assert_eq!(stats[0].expiration_entries, 3);
    assert_eq!(stats[0].attachments, 1);
}
