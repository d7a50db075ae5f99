#[macro_use]
mod common;

use common::{memory_repo, note, sqlite_repo, tick, with_id, Note};
use nosqlrepo_core::{
    BackendCapabilities, Connector, DeleteMode, InsertMode, InsertResult, MemoryConnector,
    NativeInsert, NativeUpdate, RepoError, Repository, UpdateMode, UpdateResult,
};

fn update_refreshes_only_the_update_date<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = note("before", 1);
    repo.insert(&mut entity).unwrap();
    let created = entity.meta.system_creation_date;
    tick();

    entity.title = "after".to_string();
    entity.tags = vec!["edited".to_string()];
    assert_eq!(repo.update(&mut entity).unwrap(), UpdateResult::Updated);

    let loaded = repo.get_by_id(&entity.meta.id).unwrap();
    assert_eq!(loaded, entity);
    assert_eq!(loaded.meta.system_creation_date, created);
    assert!(loaded.meta.system_last_update_date > created);
}

fn update_replaces_the_whole_document<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = note("full", 1);
    entity.tags = vec!["a".to_string(), "b".to_string()];
    repo.insert(&mut entity).unwrap();

    entity.tags.clear();
    repo.update(&mut entity).unwrap();
    assert!(repo.get_by_id(&entity.meta.id).unwrap().tags.is_empty());
}

fn update_resets_expiration<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = note("ttl", 1);
    repo.insert(&mut entity).unwrap();
    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    repo.expire_at(&entity.meta.id, Some(later)).unwrap();
    assert!(repo.expiration_of(&entity.meta.id).unwrap().is_some());

    repo.update(&mut entity).unwrap();
    assert!(repo.expiration_of(&entity.meta.id).unwrap().is_none());
}

fn missing_key_modes_resolve_before_writing<C: Connector>(repo: Repository<Note, C>) {
    let mut ghost = with_id("ghost", "ghost");

    let err = repo
        .update_with(&mut ghost, UpdateMode::ErrorIfMissingKey)
        .unwrap_err();
    assert!(matches!(err, RepoError::KeyNotFound { ref id, .. } if id == "ghost"));

    assert_eq!(
        repo.update_with(&mut ghost, UpdateMode::DoNothingIfMissingKey)
            .unwrap(),
        UpdateResult::NotAffected
    );
    assert!(!repo.exist("ghost").unwrap());

    assert_eq!(
        repo.update_with(&mut ghost, UpdateMode::UpsertIfMissingKey)
            .unwrap(),
        UpdateResult::Inserted
    );
    assert_eq!(repo.get_by_id("ghost").unwrap().title, "ghost");
}

fn soft_deleted_and_expired_ids_count_as_missing<C: Connector>(repo: Repository<Note, C>) {
    let mut soft = with_id("soft", "soft");
    let mut expired = with_id("expired", "expired");
    repo.insert(&mut soft).unwrap();
    repo.insert(&mut expired).unwrap();
    repo.delete_with("soft", DeleteMode::Logical).unwrap();
    repo.expire_at("expired", Some(chrono::Utc::now() - chrono::Duration::seconds(1)))
        .unwrap();

    for entity in [&mut soft, &mut expired] {
        let err = repo
            .update_with(entity, UpdateMode::ErrorIfMissingKey)
            .unwrap_err();
        assert!(err.is_key_not_found());
    }

    soft.title = "revived".to_string();
    assert_eq!(
        repo.update_with(&mut soft, UpdateMode::UpsertIfMissingKey)
            .unwrap(),
        UpdateResult::Inserted
    );
    let loaded = repo.get_by_id("soft").unwrap();
    assert_eq!(loaded.title, "revived");
    assert!(!loaded.meta.deleted);
}

fn update_without_id_is_rejected<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = note("no id", 1);
    let err = repo.update(&mut entity).unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

on_every_engine!(
    update_refreshes_only_the_update_date,
    update_replaces_the_whole_document,
    update_resets_expiration,
    missing_key_modes_resolve_before_writing,
    soft_deleted_and_expired_ids_count_as_missing,
    update_without_id_is_rejected,
);

#[test]
fn sqlite_native_insert_upserts_and_keeps_creation_date() {
    let repo = sqlite_repo();
    let mut first = with_id("k", "first");
    repo.insert(&mut first).unwrap();
    tick();

    let mut second = with_id("k", "second");
    assert_eq!(
        repo.insert_with(&mut second, InsertMode::DbImplementation)
            .unwrap(),
        InsertResult::Updated
    );

    let loaded = repo.get_by_id("k").unwrap();
    assert_eq!(loaded.title, "second");
    assert_eq!(
        loaded.meta.system_creation_date,
        first.meta.system_creation_date
    );
    assert!(loaded.meta.system_last_update_date > first.meta.system_last_update_date);
}

#[test]
fn memory_native_insert_reports_duplicate_without_failing() {
    let repo = memory_repo();
    let mut first = with_id("k", "first");
    repo.insert(&mut first).unwrap();

    let mut second = with_id("k", "second");
    assert_eq!(
        repo.insert_with(&mut second, InsertMode::DbImplementation)
            .unwrap(),
        InsertResult::DuplicateKey
    );
    assert_eq!(repo.get_by_id("k").unwrap().title, "first");
}

#[test]
fn sqlite_native_update_skips_missing_ids() {
    let repo = sqlite_repo();
    let mut ghost = with_id("ghost", "ghost");
    assert_eq!(
        repo.update_with(&mut ghost, UpdateMode::DbImplementation)
            .unwrap(),
        UpdateResult::NotAffected
    );
    assert!(!repo.exist("ghost").unwrap());
}

#[test]
fn memory_native_update_inserts_missing_ids() {
    let repo = memory_repo();
    let mut ghost = with_id("ghost", "ghost");
    assert_eq!(repo.update(&mut ghost).unwrap(), UpdateResult::Inserted);
    assert!(repo.exist("ghost").unwrap());
}

#[test]
fn native_insert_of_new_id_is_a_plain_insert() {
    let sqlite = sqlite_repo();
    let memory = memory_repo();
    let mut a = note("a", 1);
    let mut b = note("b", 1);

    let mut batch = vec![a.clone(), b.clone()];
    assert!(sqlite.insert_many(&mut batch).unwrap().is_complete_success());
    assert_eq!(
        memory
            .insert_with(&mut a, InsertMode::DbImplementation)
            .unwrap(),
        InsertResult::Inserted
    );
    assert_eq!(
        memory
            .insert_with(&mut b, InsertMode::DbImplementation)
            .unwrap(),
        InsertResult::Inserted
    );
    assert_eq!(sqlite.count().unwrap(), 2);
    assert_eq!(memory.count().unwrap(), 2);
}

#[test]
fn upsert_if_missing_is_rejected_when_engine_lacks_it() {
    let connector = MemoryConnector::new("no-upsert").with_capabilities(BackendCapabilities {
        native_insert: NativeInsert::ReportDuplicate,
        native_update: NativeUpdate::ReplaceIfPresent,
        upsert_if_missing: false,
        secondary_indexes: false,
    });
    let repo: Repository<Note, _> = Repository::open(connector).unwrap();

    let mut ghost = with_id("ghost", "ghost");
    let err = repo
        .update_with(&mut ghost, UpdateMode::UpsertIfMissingKey)
        .unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedOperation(_)));
    assert!(!repo.exist("ghost").unwrap());

    assert_eq!(repo.update(&mut ghost).unwrap(), UpdateResult::NotAffected);
}
