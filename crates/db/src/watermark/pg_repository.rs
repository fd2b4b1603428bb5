use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::watermark::models::SyncWatermark;
use crate::watermark::repositories::WatermarkRepository;
use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

const RETURNING: &str =
    "returning stream_key, watermark, status, error_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgWatermarkRepository {
    pool: PgPool,
}

impl PgWatermarkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> FieldsyncResult<SyncWatermark> {
        Ok(SyncWatermark {
            stream_key: row.get("stream_key"),
            watermark: row.get("watermark"),
            status: row.get("status"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl WatermarkRepository for PgWatermarkRepository {
    async fn get(&self, stream_key: &str) -> FieldsyncResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("select watermark from sync_watermarks where stream_key = $1")
            .bind(stream_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(row.and_then(|r| r.get::<Option<DateTime<Utc>>, _>("watermark")))
    }

    async fn put(
        &self,
        stream_key: &str,
        watermark: DateTime<Utc>,
    ) -> FieldsyncResult<DateTime<Utc>> {
        // greatest() ignores nulls, so a first write always lands.
        let row = sqlx::query(
            "insert into sync_watermarks (stream_key, watermark)
             values ($1, $2)
             on conflict (stream_key) do update set
               watermark = greatest(sync_watermarks.watermark, excluded.watermark),
               updated_at = now()
             returning watermark",
        )
        .bind(stream_key)
        .bind(watermark)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(row.get("watermark"))
    }

    async fn get_or_create(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark> {
        let sql = format!(
            "insert into sync_watermarks (stream_key)
             values ($1)
             on conflict (stream_key) do update set updated_at = sync_watermarks.updated_at
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(stream_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn acquire_lock(
        &self,
        stream_key: &str,
        stale_before: DateTime<Utc>,
    ) -> FieldsyncResult<Option<SyncWatermark>> {
        let sql = format!(
            "update sync_watermarks
             set status = 'running', error_message = null, updated_at = $1
             where stream_key = $2 and (status != 'running' or updated_at < $3)
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(stream_key)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_completed(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark> {
        let sql = format!(
            "update sync_watermarks
             set status = 'idle', error_message = null, updated_at = $1
             where stream_key = $2
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(stream_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn mark_failed(
        &self,
        stream_key: &str,
        error_message: &str,
    ) -> FieldsyncResult<SyncWatermark> {
        let sql = format!(
            "update sync_watermarks
             set status = 'failed', error_message = $1, updated_at = $2
             where stream_key = $3
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(error_message)
            .bind(Utc::now())
            .bind(stream_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}
