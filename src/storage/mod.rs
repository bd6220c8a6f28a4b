//! Storage layer: embedded SQLite, one database file for logs and modules,
//! a separate one for users and sessions.
//!
//! The logs file is opened twice: a single-connection writer used by the
//! intake handlers, and a read-only pool that serves web-originated
//! queries. Schema lives in `migrations/` and is applied idempotently.

pub mod log_store;
pub mod module_store;
pub mod user_store;

pub use log_store::{LogRow, LogStore, ReadOnlyLogStore};
pub use user_store::UserStore;

use crate::error::StorageError;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

static LOGS_MIGRATOR: Migrator = sqlx::migrate!("migrations/logs");

/// Open the writer and read-only handles over the same logs database file,
/// running migrations on the writer first.
///
/// # Errors
///
/// Returns [`StorageError`] when the file cannot be created/opened or a
/// migration fails. Fatal at startup.
pub async fn open_log_stores(path: &Path) -> Result<(LogStore, ReadOnlyLogStore), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Database(sqlx::Error::Io(e)))?;
    }

    let writer_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);
    // Handlers share one serialized writer connection.
    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(writer_options)
        .await?;
    LOGS_MIGRATOR.run(&writer).await?;

    let reader_options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .foreign_keys(true);
    let reader = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(reader_options)
        .await?;

    info!(path = %path.display(), "log database ready");
    Ok((LogStore::new(writer), ReadOnlyLogStore::new(reader)))
}
