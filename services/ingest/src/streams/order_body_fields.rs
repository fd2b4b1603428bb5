use std::sync::Arc;

use async_trait::async_trait;

use fieldsync_db::watermark::repositories::WatermarkRepository;

use super::{StreamContext, ORDER_BODY_FIELDS};
use crate::connector::{Connector, SyncResult};
use crate::sp10::models::{field_id, RemoteEntity};
use crate::sync::body_fields::{BodyFieldsSync, BodyOutcome};
use crate::sync::pool::{run_bounded, settle, ItemOutcome};
use crate::sync::LocalStore;

pub struct OrderBodyFieldsConnector<R, W> {
    ctx: StreamContext<W>,
    body: BodyFieldsSync<R>,
}

impl<R, W> OrderBodyFieldsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    pub fn new(store: Arc<R>, ctx: StreamContext<W>) -> Self {
        let body = BodyFieldsSync::new(store, ctx.client.clone());
        Self { ctx, body }
    }

    async fn handle(&self, order: RemoteEntity) -> ItemOutcome {
        let order_id = field_id(&order, "Id");
        let result = self.body.sync_order(&order).await.map(|outcome| match outcome {
            BodyOutcome::Updated(_) => ItemOutcome::Written,
            BodyOutcome::Unchanged => ItemOutcome::Unchanged,
            BodyOutcome::Skipped(reason) => {
                tracing::debug!(order_id = ?order_id, reason, "order skipped");
                ItemOutcome::Skipped
            }
        });
        settle(ORDER_BODY_FIELDS.name, order_id.as_deref(), result)
    }
}

#[async_trait]
impl<R, W> Connector for OrderBodyFieldsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    fn source_name(&self) -> &str {
        ORDER_BODY_FIELDS.name
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        let concurrency = self.ctx.concurrency;
        self.ctx
            .run_cycle(&ORDER_BODY_FIELDS, move |orders| {
                run_bounded(orders, concurrency, move |order| self.handle(order))
            })
            .await
    }
}
