use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::records::models::{FieldMap, FieldValue, LocalRecord};
use crate::records::repositories::{RecordRepository, ReferenceRepository};
use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

#[derive(Clone)]
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> FieldsyncResult<LocalRecord> {
        let raw_fields: serde_json::Value = row.get("fields");
        let fields: FieldMap = serde_json::from_value(raw_fields)
            .map_err(|e| FieldsyncError::Internal(format!("corrupt record fields: {e}")))?;

        Ok(LocalRecord {
            id: row.get("id"),
            record_type: row.get("record_type"),
            external_id: row.get("external_id"),
            is_inactive: row.get("is_inactive"),
            fields,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn fields_json(fields: &FieldMap) -> FieldsyncResult<serde_json::Value> {
        serde_json::to_value(fields).map_err(|e| FieldsyncError::Internal(e.to_string()))
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn find_active_by_external_id(
        &self,
        record_type: &str,
        external_id: &str,
    ) -> FieldsyncResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "select id from local_records
             where record_type = $1 and external_id = $2 and not is_inactive
             order by created_at",
        )
        .bind(record_type)
        .bind(external_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    async fn exists(&self, record_type: &str, id: Uuid) -> FieldsyncResult<bool> {
        let row = sqlx::query("select 1 as one from local_records where record_type = $1 and id = $2")
            .bind(record_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn load(&self, record_type: &str, id: Uuid) -> FieldsyncResult<LocalRecord> {
        let row = sqlx::query(
            "select id, record_type, external_id, is_inactive, fields, created_at, updated_at
             from local_records where record_type = $1 and id = $2",
        )
        .bind(record_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(FieldsyncError::NotFound(format!("{record_type} {id}"))),
        }
    }

    async fn save(&self, record: &LocalRecord) -> FieldsyncResult<Uuid> {
        let row = sqlx::query(
            "insert into local_records
             (id, record_type, external_id, is_inactive, fields, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $6, now())
             on conflict (id) do update set
               external_id = excluded.external_id,
               is_inactive = excluded.is_inactive,
               fields = excluded.fields,
               updated_at = now()
             returning id",
        )
        .bind(record.id)
        .bind(&record.record_type)
        .bind(&record.external_id)
        .bind(record.is_inactive)
        .bind(Self::fields_json(&record.fields)?)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(row.get("id"))
    }

    async fn delete(&self, record_type: &str, id: Uuid) -> FieldsyncResult<()> {
        let result = sqlx::query("delete from local_records where record_type = $1 and id = $2")
            .bind(record_type)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(FieldsyncError::NotFound(format!("{record_type} {id}")));
        }
        Ok(())
    }

    async fn submit_fields(
        &self,
        record_type: &str,
        id: Uuid,
        fields: &FieldMap,
    ) -> FieldsyncResult<()> {
        let result = sqlx::query(
            "update local_records
             set fields = fields || $3, updated_at = now()
             where record_type = $1 and id = $2",
        )
        .bind(record_type)
        .bind(id)
        .bind(Self::fields_json(fields)?)
        .execute(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(FieldsyncError::NotFound(format!("{record_type} {id}")));
        }
        Ok(())
    }

    async fn lookup_fields(
        &self,
        record_type: &str,
        id: Uuid,
        names: &[String],
    ) -> FieldsyncResult<FieldMap> {
        let record = self.load(record_type, id).await?;
        Ok(names
            .iter()
            .map(|name| {
                let value = record.get(name).cloned().unwrap_or(FieldValue::Null);
                (name.clone(), value)
            })
            .collect())
    }
}

#[async_trait]
impl ReferenceRepository for PgRecordRepository {
    async fn insert_or_fetch(
        &self,
        record_type: &str,
        remote_id: &str,
        name: &str,
    ) -> FieldsyncResult<Uuid> {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::text(name));

        // The no-op update makes `returning` yield the existing row on conflict.
        let row = sqlx::query(
            "insert into local_records (id, record_type, external_id, fields)
             values ($1, $2, $3, $4)
             on conflict (record_type, external_id) where not is_inactive and external_id is not null
             do update set updated_at = local_records.updated_at
             returning id",
        )
        .bind(Uuid::new_v4())
        .bind(record_type)
        .bind(remote_id)
        .bind(Self::fields_json(&fields)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FieldsyncError::Database(e.to_string()))?;

        Ok(row.get("id"))
    }
}
