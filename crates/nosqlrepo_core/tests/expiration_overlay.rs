#[macro_use]
mod common;

use chrono::{Duration, Utc};
use common::{with_id, Note};
use nosqlrepo_core::{Connector, DeleteMode, EntityStatus, RepoError, Repository};

fn past_expiration_hides_record_without_deleting_it<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = with_id("e1", "expiring");
    repo.insert(&mut entity).unwrap();

    repo.expire_at("e1", Some(Utc::now() - Duration::minutes(5)))
        .unwrap();

    assert!(repo.get_by_id("e1").unwrap_err().is_key_not_found());
    assert!(!repo.exist("e1").unwrap());
    assert!(repo.try_get_by_id("e1").unwrap().is_none());

    let inspected = repo.inspect("e1").unwrap().unwrap();
    assert_eq!(inspected.status, EntityStatus::Expired);
    assert!(!inspected.entity.meta.deleted);
    assert!(inspected.expiration_date.is_some());
}

fn future_expiration_keeps_record_visible<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = with_id("e1", "later");
    repo.insert(&mut entity).unwrap();

    let later = Utc::now() + Duration::days(1);
    repo.expire_at("e1", Some(later)).unwrap();

    assert!(repo.exist("e1").unwrap());
    let stored = repo.expiration_of("e1").unwrap().unwrap();
    assert!((stored - later).num_milliseconds().abs() < 1);
}

fn clearing_expiration_revives_record<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = with_id("e1", "revive");
    repo.insert(&mut entity).unwrap();
    repo.expire_at("e1", Some(Utc::now() - Duration::seconds(1)))
        .unwrap();
    assert!(!repo.exist("e1").unwrap());

    repo.expire_at("e1", None).unwrap();
    repo.expire_at("e1", None).unwrap();
    assert_eq!(repo.get_by_id("e1").unwrap(), entity);
    assert!(repo.expiration_of("e1").unwrap().is_none());
}

fn expired_records_leave_enumeration_and_count<C: Connector>(repo: Repository<Note, C>) {
    for id in ["a", "b", "c"] {
        let mut entity = with_id(id, id);
        repo.insert(&mut entity).unwrap();
    }
    repo.expire_at("b", Some(Utc::now() - Duration::seconds(1)))
        .unwrap();

    assert_eq!(repo.count().unwrap(), 2);
    let ids: Vec<String> = repo
        .get_all()
        .unwrap()
        .into_iter()
        .map(|note| note.meta.id)
        .collect();
    assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
}

fn deleted_check_precedes_expired_check<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = with_id("both", "both");
    repo.insert(&mut entity).unwrap();
    assert_eq!(repo.delete_with("both", DeleteMode::Logical).unwrap(), 1);
    repo.expire_at("both", Some(Utc::now() - Duration::seconds(1)))
        .unwrap();

    let inspected = repo.inspect("both").unwrap().unwrap();
    assert_eq!(inspected.status, EntityStatus::Deleted);
    assert!(inspected.expiration_date.is_some());
}

fn reinsert_over_expired_id_clears_expiration<C: Connector>(repo: Repository<Note, C>) {
    let mut entity = with_id("e1", "first");
    repo.insert(&mut entity).unwrap();
    repo.expire_at("e1", Some(Utc::now() - Duration::seconds(1)))
        .unwrap();

    let mut fresh = with_id("e1", "second");
    repo.insert(&mut fresh).unwrap();

    assert_eq!(repo.get_by_id("e1").unwrap().title, "second");
    assert!(repo.expiration_of("e1").unwrap().is_none());
}

fn expiring_unknown_id_fails<C: Connector>(repo: Repository<Note, C>) {
    let err = repo.expire_at("nobody", Some(Utc::now())).unwrap_err();
    assert!(matches!(err, RepoError::KeyNotFound { .. }));
}

on_every_engine!(
    past_expiration_hides_record_without_deleting_it,
    future_expiration_keeps_record_visible,
    clearing_expiration_revives_record,
    expired_records_leave_enumeration_and_count,
    deleted_check_precedes_expired_check,
    reinsert_over_expired_id_clears_expiration,
    expiring_unknown_id_fails,
);
