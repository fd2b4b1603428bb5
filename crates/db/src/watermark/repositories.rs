use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::watermark::models::SyncWatermark;
use fieldsync_common::error::FieldsyncResult;

#[async_trait]
pub trait WatermarkRepository: Send + Sync {
    /// Last observed change time for the stream, if any was ever stored.
    async fn get(&self, stream_key: &str) -> FieldsyncResult<Option<DateTime<Utc>>>;

    /// Store a new watermark. The stored value never moves backwards; the value
    /// actually kept is returned.
    async fn put(&self, stream_key: &str, watermark: DateTime<Utc>)
        -> FieldsyncResult<DateTime<Utc>>;

    /// Get or create the row for a stream.
    async fn get_or_create(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark>;

    /// Atomically set status to 'running' unless another cycle holds it.
    /// A 'running' row last touched before `stale_before` is taken over.
    /// Returns `None` if the lock was not acquired.
    async fn acquire_lock(
        &self,
        stream_key: &str,
        stale_before: DateTime<Utc>,
    ) -> FieldsyncResult<Option<SyncWatermark>>;

    /// Release the lock after a cycle finished.
    async fn mark_completed(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark>;

    /// Release the lock and record why the cycle failed.
    async fn mark_failed(&self, stream_key: &str, error_message: &str)
        -> FieldsyncResult<SyncWatermark>;
}
