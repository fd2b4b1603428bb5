use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use fieldsync_db::files::FileStore;
use fieldsync_db::watermark::repositories::WatermarkRepository;

use super::{StreamContext, ORDER_NOTES};
use crate::connector::{Connector, SyncResult};
use crate::sp10::models::{field_id, RemoteEntity};
use crate::sync::attachments::{AttachmentDownloader, AttachmentOutcome};
use crate::sync::pool::{run_bounded, settle, ItemOutcome};
use crate::sync::reconciler::UpsertReconciler;
use crate::sync::LocalStore;

/// Order notes, followed by a download of any attachment the note carries.
pub struct OrderNotesConnector<R, W> {
    ctx: StreamContext<W>,
    reconciler: UpsertReconciler<R>,
    attachments: AttachmentDownloader<R>,
}

impl<R, W> OrderNotesConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    pub fn new(store: Arc<R>, ctx: StreamContext<W>, files: Option<Arc<dyn FileStore>>) -> Self {
        let reconciler = UpsertReconciler::new(store.clone(), ctx.client.clone());
        let attachments = AttachmentDownloader::new(store, ctx.client.clone(), files);
        Self {
            ctx,
            reconciler,
            attachments,
        }
    }

    async fn handle(&self, note: RemoteEntity) -> ItemOutcome {
        let external_id = field_id(&note, "Id");
        let result = self.reconciler.upsert_order_note(&note).await;
        if let Ok(id) = &result {
            self.fetch_attachment(*id).await;
        }
        settle(
            ORDER_NOTES.name,
            external_id.as_deref(),
            result.map(|_| ItemOutcome::Written),
        )
    }

    /// Attachment problems are logged against the note but never fail it.
    async fn fetch_attachment(&self, note_id: Uuid) {
        match self.attachments.fetch_for_note(note_id).await {
            Ok(AttachmentOutcome::Stored(_)) => {}
            Ok(AttachmentOutcome::Skipped(reason)) => {
                tracing::debug!(%note_id, reason, "attachment not downloaded")
            }
            Err(e) => tracing::error!(%note_id, error = %e, "attachment download failed"),
        }
    }
}

#[async_trait]
impl<R, W> Connector for OrderNotesConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    fn source_name(&self) -> &str {
        ORDER_NOTES.name
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        let concurrency = self.ctx.concurrency;
        self.ctx
            .run_cycle(&ORDER_NOTES, move |notes| {
                run_bounded(notes, concurrency, move |note| self.handle(note))
            })
            .await
    }
}
