//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `nosqlrepo_core` linkage and print its version.
//! - Given a SQLite database path, open it and print schema and
//!   per-collection counts.
//!
//! Usage: `nosqlrepo_cli [DB_PATH]`. Set `NOSQLREPO_LOG_DIR` to an absolute
//! directory to enable file logging.

use log::info;
use nosqlrepo_core::db::migrations::current_version;
use nosqlrepo_core::{Connector, SqliteConnector};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("nosqlrepo_core version={}", nosqlrepo_core::core_version());

    if let Ok(log_dir) = std::env::var("NOSQLREPO_LOG_DIR") {
        if let Err(err) =
            nosqlrepo_core::init_logging(nosqlrepo_core::default_log_level(), &log_dir)
        {
            eprintln!("logging disabled: {err}");
        }
    }

    let Some(db_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    match describe_database(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn describe_database(db_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let backend = SqliteConnector::file(db_path).connect()?;
    info!("event=cli_describe module=cli status=start");

    println!("database={db_path}");
    println!("schema_version={}", current_version(backend.connection())?);
    for stats in backend.collection_stats()? {
        println!(
            "collection={} active={} deleted={} expirations={} attachments={}",
            stats.name,
            stats.active_documents,
            stats.deleted_documents,
            stats.expiration_entries,
            stats.attachments
        );
    }

    nosqlrepo_core::Backend::close(backend)?;
    Ok(())
}
