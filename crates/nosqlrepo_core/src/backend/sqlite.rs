//! Embedded file-based adapter backed by SQLite.
//!
//! # Responsibility
//! - Persist documents, expiration entries, attachments and field index
//!   definitions in the migrated schema from `crate::db`.
//! - Keep SQL details inside the adapter boundary.
//!
//! # Invariants
//! - Every multi-statement write runs inside one transaction.
//! - Dates are stored as UTC epoch microseconds.
//! - Field index lookups read JSON bodies with `json_each`, so array fields
//!   match on any element.
//!
//! # Native modes
//! - `InsertMode::DbImplementation` on a live id upserts and keeps the stored
//!   creation date.
//! - `UpdateMode::DbImplementation` on a missing id reports `NotAffected`.
//!
//! # Races
//! Several processes may open the same file. SQLite serializes each
//! statement, but the repository's exists-check and the following write are
//! separate statements, so a concurrent writer can slip between them.

use super::{
    Backend, BackendCapabilities, BackendError, BackendResult, BlobInfo, Connector, EngineKind,
    NativeInsert, NativeUpdate, StoredBlob, StoredDocument,
};
use crate::db::migrations::{current_version, latest_version};
use crate::db::{open_db_with, DbError, SqliteLocation, DEFAULT_BUSY_TIMEOUT};
use crate::model::entity::EntityId;
use crate::model::expiration::ExpirationEntry;
use crate::naming::{is_valid_collection_name, is_valid_field_name, json_path};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DOCUMENT_SELECT_SQL: &str = "SELECT
    id,
    discriminator,
    deleted,
    system_creation_date,
    system_last_update_date,
    body
FROM documents";

const REQUIRED_TABLES: &[&str] = &[
    "collections",
    "documents",
    "expirations",
    "attachments",
    "field_indexes",
];

/// Construction parameters for [`SqliteBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnector {
    location: SqliteLocation,
    busy_timeout: Duration,
}

impl SqliteConnector {
    /// Database stored in `path`; parent directories are created on connect.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: SqliteLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Private in-memory database. Each connect starts empty.
    pub fn in_memory() -> Self {
        Self {
            location: SqliteLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    fn database_name(&self) -> String {
        match &self.location {
            SqliteLocation::File(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SqliteLocation::Memory => "memory".to_string(),
        }
    }
}

impl Connector for SqliteConnector {
    type Backend = SqliteBackend;

    fn connect(&self) -> BackendResult<SqliteBackend> {
        let conn = open_db_with(&self.location, self.busy_timeout)?;
        SqliteBackend::try_new(conn, self.database_name())
    }
}

/// Per-collection row counts, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    pub active_documents: u64,
    pub deleted_documents: u64,
    pub expiration_entries: u64,
    pub attachments: u64,
}

/// SQLite-backed document store adapter.
pub struct SqliteBackend {
    conn: Connection,
    database_name: String,
}

impl SqliteBackend {
    /// Wraps a connection opened through `crate::db`.
    ///
    /// Rejects connections whose schema is not fully migrated.
    pub fn try_new(conn: Connection, database_name: impl Into<String>) -> BackendResult<Self> {
        ensure_schema_ready(&conn)?;
        Ok(Self {
            conn,
            database_name: database_name.into(),
        })
    }

    /// Raw connection, for diagnostics and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Row counts for every known collection, sorted by name.
    pub fn collection_stats(&self) -> BackendResult<Vec<CollectionStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                c.name AS name,
                (SELECT COUNT(*) FROM documents d
                  WHERE d.collection = c.name AND d.deleted = 0) AS active_documents,
                (SELECT COUNT(*) FROM documents d
                  WHERE d.collection = c.name AND d.deleted = 1) AS deleted_documents,
                (SELECT COUNT(*) FROM expirations e
                  WHERE e.collection = c.name) AS expiration_entries,
                (SELECT COUNT(*) FROM attachments a
                  WHERE a.collection = c.name) AS attachments
             FROM collections c
             ORDER BY c.name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut stats = Vec::new();
        while let Some(row) = rows.next()? {
            stats.push(CollectionStats {
                name: row.get("name")?,
                active_documents: count_column(row, "active_documents")?,
                deleted_documents: count_column(row, "deleted_documents")?,
                expiration_entries: count_column(row, "expiration_entries")?,
                attachments: count_column(row, "attachments")?,
            });
        }
        Ok(stats)
    }

    fn ensure_collection_row(&self, collection: &str) -> BackendResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?1);",
            [collection],
        )?;
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn database_name(&self) -> &str {
        self.database_name.as_str()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_insert: NativeInsert::Upsert,
            native_update: NativeUpdate::ReplaceIfPresent,
            upsert_if_missing: true,
            secondary_indexes: true,
        }
    }

    fn collection_exists(&self, collection: &str) -> BackendResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1);",
            [collection],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn create_collection(&self, collection: &str) -> BackendResult<()> {
        self.ensure_collection_row(collection)
    }

    fn truncate_collection(&self, collection: &str) -> BackendResult<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM documents WHERE collection = ?1;", [collection])?;
        tx.execute("DELETE FROM expirations WHERE collection = ?1;", [collection])?;
        tx.execute("DELETE FROM attachments WHERE collection = ?1;", [collection])?;
        tx.commit()?;
        Ok(removed as u64)
    }

    fn drop_collection(&self, collection: &str) -> BackendResult<()> {
        let fields = {
            let mut stmt = self
                .conn
                .prepare("SELECT field FROM field_indexes WHERE collection = ?1;")?;
            let mut rows = stmt.query([collection])?;
            let mut fields = Vec::new();
            while let Some(row) = rows.next()? {
                fields.push(row.get::<_, String>(0)?);
            }
            fields
        };

        let tx = self.conn.unchecked_transaction()?;
        for field in &fields {
            if is_valid_collection_name(collection) && is_valid_field_name(field) {
                tx.execute_batch(&format!(
                    "DROP INDEX IF EXISTS \"{}\";",
                    sql_index_name(collection, field)
                ))?;
            }
        }
        for sql in [
            "DELETE FROM documents WHERE collection = ?1;",
            "DELETE FROM expirations WHERE collection = ?1;",
            "DELETE FROM attachments WHERE collection = ?1;",
            "DELETE FROM field_indexes WHERE collection = ?1;",
            "DELETE FROM collections WHERE name = ?1;",
        ] {
            tx.execute(sql, [collection])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_document(&self, collection: &str, id: &str) -> BackendResult<Option<StoredDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL}
             WHERE collection = ?1 AND id = ?2;"
        ))?;
        let mut rows = stmt.query(params![collection, id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_document_row(row)?));
        }
        Ok(None)
    }

    fn put_document(&self, collection: &str, document: &StoredDocument) -> BackendResult<()> {
        let body = serde_json::to_string(&document.body)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?1);",
            [collection],
        )?;
        let changed = tx.execute(
            "INSERT INTO documents (
                collection,
                id,
                discriminator,
                deleted,
                system_creation_date,
                system_last_update_date,
                body
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (collection, id) DO UPDATE SET
                discriminator = excluded.discriminator,
                deleted = excluded.deleted,
                system_creation_date = excluded.system_creation_date,
                system_last_update_date = excluded.system_last_update_date,
                body = excluded.body;",
            params![
                collection,
                document.id.as_str(),
                document.discriminator.as_str(),
                bool_to_int(document.deleted),
                date_to_micros(document.system_creation_date),
                date_to_micros(document.system_last_update_date),
                body,
            ],
        )?;
        if changed != 1 {
            return Err(BackendError::NotAcknowledged("put_document"));
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> BackendResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2;",
            params![collection, id],
        )?;
        Ok(changed > 0)
    }

    fn enumerate_documents(
        &self,
        collection: &str,
        include_deleted: bool,
    ) -> BackendResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL}
             WHERE collection = ?1
               AND (?2 = 1 OR deleted = 0)
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query(params![collection, bool_to_int(include_deleted)])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn document_ids(&self, collection: &str, include_deleted: bool) -> BackendResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM documents
             WHERE collection = ?1
               AND (?2 = 1 OR deleted = 0)
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query(params![collection, bool_to_int(include_deleted)])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn get_expiration(&self, collection: &str, id: &str) -> BackendResult<Option<ExpirationEntry>> {
        let stored: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT expiration_date FROM expirations WHERE collection = ?1 AND id = ?2;",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            None => Ok(None),
            Some(micros) => {
                let expiration_date = micros
                    .map(|value| micros_to_date(value, "expirations.expiration_date"))
                    .transpose()?;
                Ok(Some(ExpirationEntry::new(id, expiration_date)))
            }
        }
    }

    fn put_expiration(&self, collection: &str, entry: &ExpirationEntry) -> BackendResult<()> {
        let changed = self.conn.execute(
            "INSERT INTO expirations (collection, id, expiration_date)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (collection, id) DO UPDATE SET
                expiration_date = excluded.expiration_date;",
            params![
                collection,
                entry.id.as_str(),
                entry.expiration_date.map(date_to_micros),
            ],
        )?;
        if changed != 1 {
            return Err(BackendError::NotAcknowledged("put_expiration"));
        }
        Ok(())
    }

    fn delete_expiration(&self, collection: &str, id: &str) -> BackendResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM expirations WHERE collection = ?1 AND id = ?2;",
            params![collection, id],
        )?;
        Ok(changed > 0)
    }

    fn expired_ids(&self, collection: &str, now: DateTime<Utc>) -> BackendResult<HashSet<EntityId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM expirations
             WHERE collection = ?1
               AND expiration_date IS NOT NULL
               AND expiration_date <= ?2;",
        )?;
        let mut rows = stmt.query(params![collection, date_to_micros(now)])?;
        let mut ids = HashSet::new();
        while let Some(row) = rows.next()? {
            ids.insert(row.get(0)?);
        }
        Ok(ids)
    }

    fn get_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<Option<StoredBlob>> {
        let blob = self
            .conn
            .query_row(
                "SELECT content_type, content FROM attachments
                 WHERE collection = ?1 AND id = ?2 AND name = ?3;",
                params![collection, id, name],
                |row| {
                    Ok(StoredBlob {
                        content_type: row.get(0)?,
                        content: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(blob)
    }

    fn blob_info(&self, collection: &str, id: &str, name: &str) -> BackendResult<Option<BlobInfo>> {
        let info = self
            .conn
            .query_row(
                "SELECT content_type, length(content) FROM attachments
                 WHERE collection = ?1 AND id = ?2 AND name = ?3;",
                params![collection, id, name],
                |row| {
                    Ok(BlobInfo {
                        content_type: row.get(0)?,
                        size: row.get::<_, i64>(1)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    fn put_blob(
        &self,
        collection: &str,
        id: &str,
        name: &str,
        blob: &StoredBlob,
    ) -> BackendResult<()> {
        let changed = self.conn.execute(
            "INSERT INTO attachments (collection, id, name, content_type, content)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (collection, id, name) DO UPDATE SET
                content_type = excluded.content_type,
                content = excluded.content,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                collection,
                id,
                name,
                blob.content_type.as_str(),
                blob.content.as_slice(),
            ],
        )?;
        if changed != 1 {
            return Err(BackendError::NotAcknowledged("put_blob"));
        }
        Ok(())
    }

    fn delete_blob(&self, collection: &str, id: &str, name: &str) -> BackendResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM attachments WHERE collection = ?1 AND id = ?2 AND name = ?3;",
            params![collection, id, name],
        )?;
        Ok(changed > 0)
    }

    fn list_blob_names(&self, collection: &str, id: &str) -> BackendResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM attachments
             WHERE collection = ?1 AND id = ?2
             ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query(params![collection, id])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn purge_orphan_expirations(&self, collection: &str) -> BackendResult<u64> {
        let removed = self.conn.execute(
            "DELETE FROM expirations
             WHERE collection = ?1
               AND NOT EXISTS (
                    SELECT 1 FROM documents d
                    WHERE d.collection = expirations.collection AND d.id = expirations.id
               );",
            [collection],
        )?;
        Ok(removed as u64)
    }

    fn purge_orphan_blobs(&self, collection: &str) -> BackendResult<u64> {
        let removed = self.conn.execute(
            "DELETE FROM attachments
             WHERE collection = ?1
               AND NOT EXISTS (
                    SELECT 1 FROM documents d
                    WHERE d.collection = attachments.collection AND d.id = attachments.id
               );",
            [collection],
        )?;
        Ok(removed as u64)
    }

    fn create_index(&self, collection: &str, field: &str) -> BackendResult<()> {
        if !is_valid_collection_name(collection) {
            return Err(BackendError::InvalidData(format!(
                "collection name `{collection}` cannot be indexed"
            )));
        }
        if !is_valid_field_name(field) {
            return Err(BackendError::InvalidData(format!(
                "field path `{field}` cannot be indexed"
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?1);",
            [collection],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO field_indexes (collection, field) VALUES (?1, ?2);",
            params![collection, field],
        )?;
        // Identifiers were validated above, so interpolation is safe here.
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}\"
                ON documents (collection, json_extract(body, '{}'));",
            sql_index_name(collection, field),
            json_path(field)
        ))?;
        tx.commit()?;

        info!("event=index_create module=backend status=ok engine=sqlite collection={collection} field={field}");
        Ok(())
    }

    fn has_index(&self, collection: &str, field: &str) -> BackendResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM field_indexes WHERE collection = ?1 AND field = ?2
            );",
            params![collection, field],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn lookup_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> BackendResult<Vec<EntityId>> {
        if !is_valid_field_name(field) {
            return Err(BackendError::InvalidData(format!(
                "field path `{field}` cannot be queried"
            )));
        }
        let bound = json_scalar_to_sql(value)?;
        let mut stmt = self.conn.prepare(&index_lookup_sql(field))?;
        let mut rows = stmt.query(params![collection, bound])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn compact(&self) -> BackendResult<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    fn close(self) -> BackendResult<()> {
        let database_name = self.database_name;
        match self.conn.close() {
            Ok(()) => {
                info!("event=db_close module=backend status=ok engine=sqlite database={database_name}");
                Ok(())
            }
            // The returned connection is dropped here, which releases the handle.
            Err((_conn, err)) => {
                warn!(
                    "event=db_close module=backend status=error engine=sqlite database={database_name} error={err}"
                );
                Err(err.into())
            }
        }
    }
}

fn ensure_schema_ready(conn: &Connection) -> BackendResult<()> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::UninitializedSchema {
            expected_version,
            actual_version,
        }
        .into());
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(DbError::MissingRequiredTable(table).into());
        }
    }
    Ok(())
}

fn parse_document_row(row: &Row<'_>) -> BackendResult<StoredDocument> {
    let id: String = row.get("id")?;

    let deleted = match row.get::<_, i64>("deleted")? {
        0 => false,
        1 => true,
        other => {
            return Err(BackendError::InvalidData(format!(
                "invalid deleted value `{other}` in documents.deleted"
            )));
        }
    };

    let body_text: String = row.get("body")?;
    let body = serde_json::from_str(&body_text).map_err(|err| {
        BackendError::InvalidData(format!("invalid json body for document `{id}`: {err}"))
    })?;

    Ok(StoredDocument {
        discriminator: row.get("discriminator")?,
        deleted,
        system_creation_date: micros_to_date(
            row.get("system_creation_date")?,
            "documents.system_creation_date",
        )?,
        system_last_update_date: micros_to_date(
            row.get("system_last_update_date")?,
            "documents.system_last_update_date",
        )?,
        body,
        id,
    })
}

fn json_scalar_to_sql(value: &Value) -> BackendResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(flag) => Ok(SqlValue::Integer(bool_to_int(*flag))),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(SqlValue::Integer(integer))
            } else if let Some(real) = number.as_f64() {
                Ok(SqlValue::Real(real))
            } else {
                Err(BackendError::InvalidData(format!(
                    "number `{number}` cannot be used as an index key"
                )))
            }
        }
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Array(_) | Value::Object(_) => Err(BackendError::InvalidData(
            "index lookups require a scalar value".to_string(),
        )),
    }
}

/// Field lookup over one collection. Scalar fields are matched through the
/// same `json_extract` expression the field index is built on, so the planner
/// can search the index; array fields fall back to `json_each`.
///
/// `field` must already be validated: the path is inlined as a literal
/// because expression indexes only match literal paths.
fn index_lookup_sql(field: &str) -> String {
    let path = json_path(field);
    format!(
        "SELECT id FROM documents
         WHERE collection = ?1
           AND deleted = 0
           AND json_extract(body, '{path}') IS ?2
           AND json_type(body, '{path}') NOT IN ('array', 'object')
         UNION
         SELECT d.id FROM documents d
         WHERE d.collection = ?1
           AND d.deleted = 0
           AND json_type(d.body, '{path}') = 'array'
           AND EXISTS (
                SELECT 1 FROM json_each(d.body, '{path}') AS je
                WHERE je.type NOT IN ('array', 'object') AND je.value IS ?2
           )
         ORDER BY 1;"
    )
}

fn sql_index_name(collection: &str, field: &str) -> String {
    format!("ix_{collection}__{}", field.replace('.', "_"))
}

fn count_column(row: &Row<'_>, column: &str) -> BackendResult<u64> {
    Ok(row.get::<_, i64>(column)?.max(0) as u64)
}

fn date_to_micros(date: DateTime<Utc>) -> i64 {
    date.timestamp_micros()
}

fn micros_to_date(value: i64, column: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        BackendError::InvalidData(format!("invalid timestamp `{value}` in {column}"))
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
