#![allow(dead_code)]

use nosqlrepo_core::{Entity, EntityMeta, MemoryConnector, Repository, SqliteConnector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub rank: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entity for Note {
    const TYPE_NAME: &'static str = "Note";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

pub fn note(title: &str, rank: i64) -> Note {
    Note {
        meta: EntityMeta::new(),
        title: title.to_string(),
        rank,
        tags: Vec::new(),
    }
}

pub fn tagged(title: &str, tags: &[&str]) -> Note {
    Note {
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        ..note(title, 0)
    }
}

pub fn with_id(id: &str, title: &str) -> Note {
    Note {
        meta: EntityMeta::with_id(id),
        ..note(title, 0)
    }
}

pub fn sqlite_repo() -> Repository<Note, SqliteConnector> {
    Repository::open(SqliteConnector::in_memory()).unwrap()
}

pub fn memory_repo() -> Repository<Note, MemoryConnector> {
    Repository::open(MemoryConnector::new("test")).unwrap()
}

/// Short pause so consecutive timestamps differ at microsecond precision.
pub fn tick() {
    std::thread::sleep(std::time::Duration::from_millis(3));
}

/// Generates one `#[test]` per engine for each listed generic check.
///
/// Each check is a function `fn check<C: Connector>(repo: Repository<Note, C>)`.
macro_rules! on_every_engine {
    ($($check:ident),* $(,)?) => {
        mod sqlite_engine {
            $(
                #[test]
                fn $check() {
                    super::$check(crate::common::sqlite_repo());
                }
            )*
        }

        mod memory_engine {
            $(
                #[test]
                fn $check() {
                    super::$check(crate::common::memory_repo());
                }
            )*
        }
    };
}
