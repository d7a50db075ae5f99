//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by the document store.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Busy timeout applied when the caller does not choose one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Database file; parent directories are created on open.
    File(PathBuf),
    /// Private in-memory database, discarded when the connection closes.
    Memory,
}

impl SqliteLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens a SQLite database file and applies all pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with(
        &SqliteLocation::File(path.as_ref().to_path_buf()),
        DEFAULT_BUSY_TIMEOUT,
    )
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_db_with(&SqliteLocation::Memory, DEFAULT_BUSY_TIMEOUT)
}

/// Opens a database at `location` with the given busy timeout.
///
/// # Side effects
/// - Creates missing parent directories for file databases.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_with(location: &SqliteLocation, busy_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = location.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match location {
        SqliteLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    error!(
                        "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_dir_failed error={}",
                        started_at.elapsed().as_millis(),
                        err
                    );
                    return Err(err.into());
                }
            }
            Connection::open(path)
        }
        SqliteLocation::Memory => Connection::open_in_memory(),
    };

    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, busy_timeout) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    apply_migrations(conn)?;
    Ok(())
}
