pub mod appointments;
pub mod deleted_appointments;
pub mod order_body_fields;
pub mod order_notes;

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};

use fieldsync_common::error::FieldsyncResult;
use fieldsync_config::{StreamSettings, SyncConfig};
use fieldsync_db::files::FileStore;
use fieldsync_db::watermark::repositories::WatermarkRepository;

use crate::connector::{Connector, SyncResult};
use crate::sp10::client::Sp10Client;
use crate::sp10::models::RemoteEntity;
use crate::sync::fetcher::{ChangeFetcher, StreamDescriptor};
use crate::sync::pool::ItemOutcome;
use crate::sync::LocalStore;

pub const APPOINTMENTS: StreamDescriptor = StreamDescriptor {
    name: "appointments",
    stream_key: "__clock",
    resource: "Appointment",
    select: Some("*"),
    expand: Some("AppointmentStatus,AssignedTech,Order"),
    filter_field: "LastUpdatedDateTime",
    default_max_pages: 100,
};

pub const DELETED_APPOINTMENTS: StreamDescriptor = StreamDescriptor {
    name: "deleted_appointments",
    stream_key: "__clock_deleteappt",
    resource: "Appointment/Deleted",
    select: None,
    expand: None,
    filter_field: "DeletedDateTime",
    default_max_pages: 5,
};

pub const ORDER_BODY_FIELDS: StreamDescriptor = StreamDescriptor {
    name: "order_body_fields",
    stream_key: "__clock_bodyfields",
    resource: "Order",
    select: Some("*"),
    expand: Some("AssignedTo,OrderStatus"),
    filter_field: "LastUpdatedDateTime",
    default_max_pages: 100,
};

pub const ORDER_NOTES: StreamDescriptor = StreamDescriptor {
    name: "order_notes",
    stream_key: "__clock_ordernotes",
    resource: "OrderNote",
    select: Some("*"),
    expand: Some("NoteType,CreatedUser,Order"),
    filter_field: "LastUpdatedDateTime",
    default_max_pages: 100,
};

/// A `running` lock older than this belongs to a crashed cycle and is taken over.
const LOCK_STALE_AFTER_HOURS: i64 = 1;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared per-stream plumbing: locking, fetching and result bookkeeping.
pub struct StreamContext<W> {
    pub client: Sp10Client,
    pub watermarks: Arc<W>,
    pub settings: StreamSettings,
    pub lookback_hours: i64,
    pub concurrency: usize,
}

impl<W: WatermarkRepository> StreamContext<W> {
    pub fn new(
        client: Sp10Client,
        watermarks: Arc<W>,
        settings: StreamSettings,
        config: &SyncConfig,
    ) -> Self {
        Self {
            client,
            watermarks,
            settings,
            lookback_hours: config.lookback_hours,
            concurrency: config.worker_concurrency,
        }
    }

    /// One cycle of `stream`: lock, fetch every page, hand the entities to
    /// `process`, then release the lock.
    pub async fn run_cycle<F, Fut>(
        &self,
        stream: &StreamDescriptor,
        process: F,
    ) -> Result<SyncResult, BoxError>
    where
        F: FnOnce(Vec<RemoteEntity>) -> Fut,
        Fut: Future<Output = Vec<ItemOutcome>>,
    {
        self.watermarks.get_or_create(stream.stream_key).await?;

        let stale_before = Utc::now() - Duration::hours(LOCK_STALE_AFTER_HOURS);
        if self
            .watermarks
            .acquire_lock(stream.stream_key, stale_before)
            .await?
            .is_none()
        {
            tracing::info!(stream = stream.name, "sync already running, skipping");
            return Ok(SyncResult::empty(stream.name));
        }

        let fetcher = ChangeFetcher::new(&self.client, &*self.watermarks, self.lookback_hours);
        let fetched = fetcher.fetch(stream, &self.settings).await;
        tracing::info!(
            stream = stream.name,
            entities = fetched.entities.len(),
            pages = fetched.pages,
            truncated = fetched.truncated,
            watermark = ?fetched.watermark,
            "fetched changes"
        );
        if fetched.truncated {
            tracing::warn!(
                stream = stream.name,
                max_pages = self.settings.max_pages,
                "page bound reached, remaining changes wait for the next cycle"
            );
        }

        let mut result = SyncResult::empty(stream.name);
        result.pages = fetched.pages;
        result.truncated = fetched.truncated;

        for outcome in process(fetched.entities).await {
            result.record(outcome);
        }

        match fetched.error {
            Some(e) => {
                result.errors += 1;
                self.watermarks
                    .mark_failed(stream.stream_key, &e.to_string())
                    .await?;
            }
            None => {
                self.watermarks.mark_completed(stream.stream_key).await?;
            }
        }

        tracing::info!(
            stream = stream.name,
            upserted = result.upserted,
            unchanged = result.unchanged,
            deleted = result.deleted,
            skipped = result.skipped,
            errors = result.errors,
            pages = result.pages,
            truncated = result.truncated,
            "sync cycle finished"
        );
        Ok(result)
    }
}

/// Every stream connector in the order they run.
pub fn build_connectors<R, W>(
    store: Arc<R>,
    watermarks: Arc<W>,
    client: Sp10Client,
    files: Option<Arc<dyn FileStore>>,
    config: &SyncConfig,
) -> FieldsyncResult<Vec<Box<dyn Connector>>>
where
    R: LocalStore + 'static,
    W: WatermarkRepository + 'static,
{
    let context = |stream: &StreamDescriptor| -> FieldsyncResult<StreamContext<W>> {
        let settings = StreamSettings::from_env(stream.name, stream.default_max_pages)?;
        Ok(StreamContext::new(
            client.clone(),
            watermarks.clone(),
            settings,
            config,
        ))
    };

    Ok(vec![
        Box::new(appointments::AppointmentsConnector::new(
            store.clone(),
            context(&APPOINTMENTS)?,
        )) as Box<dyn Connector>,
        Box::new(deleted_appointments::DeletedAppointmentsConnector::new(
            store.clone(),
            context(&DELETED_APPOINTMENTS)?,
        )) as Box<dyn Connector>,
        Box::new(order_body_fields::OrderBodyFieldsConnector::new(
            store.clone(),
            context(&ORDER_BODY_FIELDS)?,
        )) as Box<dyn Connector>,
        Box::new(order_notes::OrderNotesConnector::new(
            store,
            context(&ORDER_NOTES)?,
            files,
        )) as Box<dyn Connector>,
    ])
}
