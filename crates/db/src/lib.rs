pub mod files;
pub mod in_memory;
pub mod records;
pub mod watermark;

use fieldsync_common::error::{FieldsyncError, FieldsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> FieldsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))
}

/// Create the watermark and record tables (and the active external-id index) if missing.
pub async fn ensure_schema(pool: &PgPool) -> FieldsyncResult<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;
    Ok(())
}
