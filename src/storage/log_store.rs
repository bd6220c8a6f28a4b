//! Log table DML and the read-only query paths.

use crate::error::StorageError;
use crate::record::{LogRecord, Parsed};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

/// Serialized writer over the logs database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct LogStore {
    pool: SqlitePool,
}

/// One row as the web layer reads it back.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: i64,
    pub name: String,
    pub host: String,
    pub parsed: Parsed,
    pub raw: String,
}

const INSERT_LOG: &str = "
INSERT INTO logs (name, path, host, timestamp, module, raw, parsed)
VALUES (?, ?, ?, ?, ?, ?, ?)
";

const UPSERT_MODULE: &str = "
INSERT INTO modules (module, schema_json)
VALUES (?, ?)
ON CONFLICT(module) DO NOTHING
";

impl LogStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one record, upserting its module first so the foreign key
    /// always holds, including for the empty module string an agent sends
    /// when no parser was configured.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on serialization or database failure.
    pub async fn insert_log(&self, record: &LogRecord) -> Result<(), StorageError> {
        sqlx::query(UPSERT_MODULE)
            .bind(&record.module)
            .bind("{}")
            .execute(&self.pool)
            .await?;

        sqlx::query(INSERT_LOG)
            .bind(&record.name)
            .bind(&record.path)
            .bind(&record.host)
            .bind(record.timestamp)
            .bind(&record.module)
            .bind(&record.raw)
            .bind(record.parsed.to_json_text()?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a batch atomically: one transaction, modules upserted once
    /// each, all rows or none.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`]; the transaction rolls back on any failure.
    pub async fn insert_logs_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *tx)
            .await?;

        let modules: BTreeSet<&str> = records.iter().map(|r| r.module.as_str()).collect();
        for module in modules {
            sqlx::query(UPSERT_MODULE)
                .bind(module)
                .bind("{}")
                .execute(&mut *tx)
                .await?;
        }

        for record in records {
            sqlx::query(INSERT_LOG)
                .bind(&record.name)
                .bind(&record.path)
                .bind(&record.host)
                .bind(record.timestamp)
                .bind(&record.module)
                .bind(&record.raw)
                .bind(record.parsed.to_json_text()?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(rows = records.len(), "batch committed");
        Ok(())
    }
}

/// Read-only handle serving the web query paths.
#[derive(Debug, Clone)]
pub struct ReadOnlyLogStore {
    pool: SqlitePool,
}

/// Decode the `parsed` column, which may come back as TEXT, BLOB or NULL.
/// NULL is a row-level error, never a silent empty map.
fn decode_parsed(row: &SqliteRow, index: usize) -> Result<Parsed, StorageError> {
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(index) {
        return serde_json::from_str(&text)
            .map_err(|e| StorageError::BadParsedColumn(format!("undecodable text: {e}")));
    }
    if let Ok(Some(blob)) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return serde_json::from_slice(&blob)
            .map_err(|e| StorageError::BadParsedColumn(format!("undecodable blob: {e}")));
    }
    Err(StorageError::BadParsedColumn(
        "NULL parsed column".to_string(),
    ))
}

fn decode_row(row: &SqliteRow) -> Result<LogRow, StorageError> {
    Ok(LogRow {
        timestamp: row.try_get(0)?,
        name: row.try_get(1)?,
        host: row.try_get(2)?,
        parsed: decode_parsed(row, 3)?,
        raw: row.try_get(4)?,
    })
}

impl ReadOnlyLogStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The `n` most recent rows by agent-assigned timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on query failure or a bad `parsed` column.
    pub async fn recent(&self, n: i64) -> Result<Vec<LogRow>, StorageError> {
        let rows = sqlx::query(
            "SELECT timestamp, name, host, parsed, raw FROM logs \
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Run operator-supplied SQL and decode rows in the same
    /// `timestamp,name,host,parsed,raw` shape. Deliberately unsanitized:
    /// this is an operator-grade endpoint behind authentication, on a
    /// read-only connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] for SQL errors or rows that do not fit the
    /// expected shape.
    pub async fn run_query(&self, sql: &str) -> Result<Vec<LogRow>, StorageError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now_unix;
    use serde_json::json;

    async fn scratch_stores() -> (tempfile::TempDir, LogStore, ReadOnlyLogStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logcrunch.db");
        let (writer, reader) = crate::storage::open_log_stores(&path).await.unwrap();
        (dir, writer, reader)
    }

    fn record(name: &str, module: &str, timestamp: i64) -> LogRecord {
        let mut fields = serde_json::Map::new();
        fields.insert("message".to_string(), json!("hello"));
        LogRecord {
            name: name.to_string(),
            path: "/var/log/test.log".to_string(),
            host: "agent01".to_string(),
            timestamp,
            module: module.to_string(),
            parsed: Parsed::Fields(fields),
            raw: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_should_insert_log_and_upsert_module_row() {
        let (_dir, writer, reader) = scratch_stores().await;
        writer
            .insert_log(&record("AuthLog", "syslog", now_unix()))
            .await
            .unwrap();

        let rows = reader.recent(50).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "AuthLog");
        assert_eq!(rows[0].parsed.fields().unwrap()["message"], json!("hello"));

        let module_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE module = 'syslog'")
                .fetch_one(writer.pool())
                .await
                .unwrap();
        assert_eq!(module_count, 1);
    }

    #[tokio::test]
    async fn test_should_tolerate_empty_module_string() {
        let (_dir, writer, _reader) = scratch_stores().await;
        writer
            .insert_log(&record("Bare", "", now_unix()))
            .await
            .unwrap();

        let module_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE module = ''")
                .fetch_one(writer.pool())
                .await
                .unwrap();
        assert_eq!(module_count, 1);
    }

    #[tokio::test]
    async fn test_should_batch_insert_with_single_module_upsert() {
        let (_dir, writer, reader) = scratch_stores().await;
        let base = now_unix();
        let batch: Vec<LogRecord> = (0..5)
            .map(|n| record(&format!("t{n}"), "syslog", base + n))
            .collect();

        writer.insert_logs_batch(&batch).await.unwrap();

        let rows = reader.recent(50).await.unwrap();
        assert_eq!(rows.len(), 5);
        // Most recent first.
        assert_eq!(rows[0].name, "t4");

        let module_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE module = 'syslog'")
                .fetch_one(writer.pool())
                .await
                .unwrap();
        assert_eq!(module_count, 1);
    }

    #[tokio::test]
    async fn test_should_report_null_parsed_as_row_error() {
        let (_dir, writer, reader) = scratch_stores().await;
        writer
            .insert_log(&record("AuthLog", "syslog", now_unix()))
            .await
            .unwrap();

        // The column itself is NOT NULL, but operator SQL can still produce
        // a NULL in that position; it must surface as an error.
        let result = reader
            .run_query("SELECT timestamp, name, host, NULL, raw FROM logs")
            .await;
        assert!(matches!(result, Err(StorageError::BadParsedColumn(_))));
    }

    #[tokio::test]
    async fn test_should_run_operator_query_on_ro_handle() {
        let (_dir, writer, reader) = scratch_stores().await;
        writer
            .insert_log(&record("AuthLog", "syslog", 100))
            .await
            .unwrap();
        writer
            .insert_log(&record("WebLog", "apache", 200))
            .await
            .unwrap();

        let rows = reader
            .run_query(
                "SELECT timestamp, name, host, parsed, raw FROM logs \
                 WHERE name = 'WebLog' ORDER BY timestamp",
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 200);

        // Writes must be refused by the read-only handle.
        assert!(reader.run_query("DELETE FROM logs").await.is_err());
    }

    #[tokio::test]
    async fn test_should_preserve_error_marker_round_trip_through_store() {
        let (_dir, writer, reader) = scratch_stores().await;
        let mut rec = record("Bad", "apache", now_unix());
        rec.parsed = Parsed::Error("no match".to_string());
        writer.insert_log(&rec).await.unwrap();

        let rows = reader.recent(1).await.unwrap();
        assert_eq!(rows[0].parsed, Parsed::Error("no match".to_string()));
    }
}
