use std::sync::Arc;

use async_trait::async_trait;

use fieldsync_db::watermark::repositories::WatermarkRepository;

use super::{StreamContext, DELETED_APPOINTMENTS};
use crate::connector::{Connector, SyncResult};
use crate::sp10::models::{field_id, RemoteEntity};
use crate::sync::deletion::{DeleteOutcome, DeletionPropagator};
use crate::sync::pool::{run_bounded, settle, ItemOutcome};
use crate::sync::LocalStore;

pub struct DeletedAppointmentsConnector<R, W> {
    ctx: StreamContext<W>,
    propagator: DeletionPropagator<R>,
}

impl<R, W> DeletedAppointmentsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    pub fn new(store: Arc<R>, ctx: StreamContext<W>) -> Self {
        Self {
            ctx,
            propagator: DeletionPropagator::new(store),
        }
    }

    async fn handle(&self, item: RemoteEntity) -> ItemOutcome {
        let external_id = field_id(&item, "Id");
        let result = self
            .propagator
            .delete_by_remote_id(&item)
            .await
            .map(|outcome| match outcome {
                DeleteOutcome::Deleted(_) => ItemOutcome::Deleted,
                DeleteOutcome::NotFound => ItemOutcome::Skipped,
            });
        settle(DELETED_APPOINTMENTS.name, external_id.as_deref(), result)
    }
}

#[async_trait]
impl<R, W> Connector for DeletedAppointmentsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    fn source_name(&self) -> &str {
        DELETED_APPOINTMENTS.name
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        let concurrency = self.ctx.concurrency;
        self.ctx
            .run_cycle(&DELETED_APPOINTMENTS, move |items| {
                run_bounded(items, concurrency, move |item| self.handle(item))
            })
            .await
    }
}
