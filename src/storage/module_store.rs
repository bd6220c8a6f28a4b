//! Module table maintenance: the parser registry's definitions are seeded
//! into the store at startup so the persisted schema of every module stays
//! current across restarts. A dynamic registry addition would reuse the
//! same upsert.

use crate::error::StorageError;
use crate::parser;
use crate::record::now_unix;
use crate::storage::LogStore;
use tracing::debug;

/// Upsert one module definition, replacing any stored schema.
///
/// # Errors
///
/// Returns [`StorageError`] on database failure.
pub async fn insert_module(
    store: &LogStore,
    module: &str,
    schema_json: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO modules (module, schema_json, created_at) \
         VALUES (?, ?, ?) \
         ON CONFLICT(module) DO UPDATE SET \
             schema_json = excluded.schema_json, \
             created_at = excluded.created_at",
    )
    .bind(module)
    .bind(schema_json)
    .bind(now_unix())
    .execute(store.pool())
    .await?;
    Ok(())
}

/// Seed every registry module into the store.
///
/// # Errors
///
/// Returns [`StorageError`] on serialization or database failure.
pub async fn seed_registry(store: &LogStore) -> Result<(), StorageError> {
    for (name, module) in parser::registry() {
        let schema_json = module.schema_json()?;
        insert_module(store, name, &schema_json).await?;
        debug!(module = %name, "seeded parser module");
    }
    Ok(())
}
