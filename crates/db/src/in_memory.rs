//! In-memory record, reference and watermark store.
//!
//! Used by the engine tests and for dry runs without a database. Failure
//! switches let tests exercise the load/save/delete error paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::files::FileStore;
use crate::records::models::{FieldMap, FieldValue, LocalRecord};
use crate::records::repositories::{RecordRepository, ReferenceRepository};
use crate::watermark::models::{SyncWatermark, STATUS_FAILED, STATUS_IDLE, STATUS_RUNNING};
use crate::watermark::repositories::WatermarkRepository;
use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<Uuid, LocalRecord>>,
    watermarks: RwLock<HashMap<String, SyncWatermark>>,
    submissions: RwLock<Vec<(Uuid, FieldMap)>>,
    fail_loads: AtomicBool,
    vanish_loads: AtomicBool,
    fail_saves: AtomicBool,
    fail_delete_types: RwLock<HashSet<String>>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing uniqueness checks.
    pub async fn insert(&self, record: LocalRecord) -> Uuid {
        let id = record.id;
        self.records.write().await.insert(id, record);
        id
    }

    pub async fn get_record(&self, id: Uuid) -> Option<LocalRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn records_of_type(&self, record_type: &str) -> Vec<LocalRecord> {
        let mut out: Vec<LocalRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// Every partial update submitted so far, in order.
    pub async fn submissions(&self) -> Vec<(Uuid, FieldMap)> {
        self.submissions.read().await.clone()
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make `load` report `NotFound` while lookups still see the record, as when a
    /// row is deleted between the two calls.
    pub fn set_vanish_loads(&self, vanish: bool) {
        self.vanish_loads.store(vanish, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn fail_deletes_for(&self, record_type: &str) {
        self.fail_delete_types
            .write()
            .await
            .insert(record_type.to_owned());
    }

    /// Every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> FieldsyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FieldsyncError::Database("store offline".to_string()));
        }
        Ok(())
    }

    fn active_match(record: &LocalRecord, record_type: &str, external_id: &str) -> bool {
        record.record_type == record_type
            && !record.is_inactive
            && record.external_id.as_deref() == Some(external_id)
    }
}

#[async_trait]
impl RecordRepository for InMemoryStore {
    async fn find_active_by_external_id(
        &self,
        record_type: &str,
        external_id: &str,
    ) -> FieldsyncResult<Vec<Uuid>> {
        self.check_online()?;
        let guard = self.records.read().await;
        let mut matches: Vec<&LocalRecord> = guard
            .values()
            .filter(|r| Self::active_match(r, record_type, external_id))
            .collect();
        matches.sort_by_key(|r| r.created_at);
        Ok(matches.into_iter().map(|r| r.id).collect())
    }

    async fn exists(&self, record_type: &str, id: Uuid) -> FieldsyncResult<bool> {
        self.check_online()?;
        Ok(self
            .records
            .read()
            .await
            .get(&id)
            .is_some_and(|r| r.record_type == record_type))
    }

    async fn load(&self, record_type: &str, id: Uuid) -> FieldsyncResult<LocalRecord> {
        self.check_online()?;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(FieldsyncError::Database(format!("load {record_type} {id} failed")));
        }
        if self.vanish_loads.load(Ordering::SeqCst) {
            return Err(FieldsyncError::NotFound(format!("{record_type} {id}")));
        }
        self.records
            .read()
            .await
            .get(&id)
            .filter(|r| r.record_type == record_type)
            .cloned()
            .ok_or_else(|| FieldsyncError::NotFound(format!("{record_type} {id}")))
    }

    async fn save(&self, record: &LocalRecord) -> FieldsyncResult<Uuid> {
        self.check_online()?;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(FieldsyncError::Database(format!(
                "save {} {} failed",
                record.record_type, record.id
            )));
        }

        let mut guard = self.records.write().await;

        // Mirror the partial unique index on active (record_type, external_id).
        if let Some(ext) = record.external_id.as_deref() {
            if !record.is_inactive {
                let clash = guard.values().any(|r| {
                    r.id != record.id && Self::active_match(r, &record.record_type, ext)
                });
                if clash {
                    return Err(FieldsyncError::Database(format!(
                        "duplicate active {} with external id {ext}",
                        record.record_type
                    )));
                }
            }
        }

        let mut stored = record.clone();
        stored.updated_at = Utc::now();
        guard.insert(stored.id, stored);
        Ok(record.id)
    }

    async fn delete(&self, record_type: &str, id: Uuid) -> FieldsyncResult<()> {
        self.check_online()?;
        if self.fail_delete_types.read().await.contains(record_type) {
            return Err(FieldsyncError::Database(format!("delete {record_type} {id} failed")));
        }
        let mut guard = self.records.write().await;
        match guard.get(&id) {
            Some(r) if r.record_type == record_type => {
                guard.remove(&id);
                Ok(())
            }
            _ => Err(FieldsyncError::NotFound(format!("{record_type} {id}"))),
        }
    }

    async fn submit_fields(
        &self,
        record_type: &str,
        id: Uuid,
        fields: &FieldMap,
    ) -> FieldsyncResult<()> {
        self.check_online()?;
        {
            let mut guard = self.records.write().await;
            let record = guard
                .get_mut(&id)
                .filter(|r| r.record_type == record_type)
                .ok_or_else(|| FieldsyncError::NotFound(format!("{record_type} {id}")))?;
            for (k, v) in fields {
                record.fields.insert(k.clone(), v.clone());
            }
            record.updated_at = Utc::now();
        }
        self.submissions.write().await.push((id, fields.clone()));
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
            .map(|n| (n.clone(), record.get(n).cloned().unwrap_or(FieldValue::Null)))
            .collect())
    }
}

#[async_trait]
impl ReferenceRepository for InMemoryStore {
    async fn insert_or_fetch(
        &self,
        record_type: &str,
        remote_id: &str,
        name: &str,
    ) -> FieldsyncResult<Uuid> {
        self.check_online()?;
        // Search and insert under one write lock.
        let mut guard = self.records.write().await;
        if let Some(existing) = guard
            .values()
            .filter(|r| Self::active_match(r, record_type, remote_id))
            .min_by_key(|r| r.created_at)
        {
            return Ok(existing.id);
        }

        let mut record = LocalRecord::new(record_type).with_external_id(remote_id);
        record.set("name", name);
        let id = record.id;
        guard.insert(id, record);
        Ok(id)
    }
}

#[async_trait]
impl WatermarkRepository for InMemoryStore {
    async fn get(&self, stream_key: &str) -> FieldsyncResult<Option<DateTime<Utc>>> {
        self.check_online()?;
        Ok(self
            .watermarks
            .read()
            .await
            .get(stream_key)
            .and_then(|w| w.watermark))
    }

    async fn put(
        &self,
        stream_key: &str,
        watermark: DateTime<Utc>,
    ) -> FieldsyncResult<DateTime<Utc>> {
        self.check_online()?;
        let mut guard = self.watermarks.write().await;
        let row = guard
            .entry(stream_key.to_owned())
            .or_insert_with(|| SyncWatermark::new(stream_key));
        let kept = match row.watermark {
            Some(current) if current > watermark => current,
            _ => watermark,
        };
        row.watermark = Some(kept);
        row.updated_at = Utc::now();
        Ok(kept)
    }

    async fn get_or_create(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark> {
        self.check_online()?;
        Ok(self
            .watermarks
            .write()
            .await
            .entry(stream_key.to_owned())
            .or_insert_with(|| SyncWatermark::new(stream_key))
            .clone())
    }

    async fn acquire_lock(
        &self,
        stream_key: &str,
        stale_before: DateTime<Utc>,
    ) -> FieldsyncResult<Option<SyncWatermark>> {
        self.check_online()?;
        let mut guard = self.watermarks.write().await;
        let Some(row) = guard.get_mut(stream_key) else {
            return Ok(None);
        };
        if row.is_running() && row.updated_at >= stale_before {
            return Ok(None);
        }
        row.status = STATUS_RUNNING.to_owned();
        row.error_message = None;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn mark_completed(&self, stream_key: &str) -> FieldsyncResult<SyncWatermark> {
        self.check_online()?;
        let mut guard = self.watermarks.write().await;
        let row = guard
            .get_mut(stream_key)
            .ok_or_else(|| FieldsyncError::NotFound(format!("watermark {stream_key}")))?;
        row.status = STATUS_IDLE.to_owned();
        row.error_message = None;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn mark_failed(
        &self,
        stream_key: &str,
        error_message: &str,
    ) -> FieldsyncResult<SyncWatermark> {
        self.check_online()?;
        let mut guard = self.watermarks.write().await;
        let row = guard
            .get_mut(stream_key)
            .ok_or_else(|| FieldsyncError::NotFound(format!("watermark {stream_key}")))?;
        row.status = STATUS_FAILED.to_owned();
        row.error_message = Some(error_message.to_owned());
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

/// Keeps saved files in memory, keyed by name.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(name).cloned()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn save(&self, name: &str, contents: &[u8]) -> FieldsyncResult<String> {
        self.files
            .write()
            .await
            .insert(name.to_owned(), contents.to_vec());
        Ok(name.to_owned())
    }
}
