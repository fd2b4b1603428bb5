use async_trait::async_trait;
use uuid::Uuid;

use crate::records::models::{FieldMap, LocalRecord};
use fieldsync_common::error::FieldsyncResult;

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Ids of every active record of `record_type` carrying `external_id`.
    /// Callers decide what zero or several matches mean.
    async fn find_active_by_external_id(
        &self,
        record_type: &str,
        external_id: &str,
    ) -> FieldsyncResult<Vec<Uuid>>;

    /// Whether a record with this local id exists (active or not).
    async fn exists(&self, record_type: &str, id: Uuid) -> FieldsyncResult<bool>;

    /// Returns `FieldsyncError::NotFound` when the record is missing.
    async fn load(&self, record_type: &str, id: Uuid) -> FieldsyncResult<LocalRecord>;

    /// Insert the record, or replace it if the id already exists.
    async fn save(&self, record: &LocalRecord) -> FieldsyncResult<Uuid>;

    async fn delete(&self, record_type: &str, id: Uuid) -> FieldsyncResult<()>;

    /// Merge `fields` into the stored record without touching other fields.
    async fn submit_fields(
        &self,
        record_type: &str,
        id: Uuid,
        fields: &FieldMap,
    ) -> FieldsyncResult<()>;

    /// Current values of `names`; missing fields come back as `FieldValue::Null`.
    async fn lookup_fields(
        &self,
        record_type: &str,
        id: Uuid,
        names: &[String],
    ) -> FieldsyncResult<FieldMap>;
}

#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    /// Atomically return the active reference record for (record_type, remote_id),
    /// creating it with `name` if none exists. Concurrent callers for the same key
    /// observe the same id.
    async fn insert_or_fetch(
        &self,
        record_type: &str,
        remote_id: &str,
        name: &str,
    ) -> FieldsyncResult<Uuid>;
}
