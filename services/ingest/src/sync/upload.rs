use std::sync::Arc;

use uuid::Uuid;

use super::error::ReconcileError;
use super::schema::SALES_ORDER;
use super::LocalStore;
use crate::sp10::client::Sp10Client;
use crate::sp10::models::{NoteUpload, RemoteEntity};

/// Sends local files to SP10 as file notes on the matching order.
pub struct NoteUploader<R> {
    store: Arc<R>,
    client: Sp10Client,
}

impl<R: LocalStore> NoteUploader<R> {
    pub fn new(store: Arc<R>, client: Sp10Client) -> Self {
        Self { store, client }
    }

    /// The created SP10 note row, or `None` when nothing was uploaded.
    /// Failures are logged, not returned.
    pub async fn upload(&self, sales_order: Uuid, note: &NoteUpload) -> Option<RemoteEntity> {
        match self.try_upload(sales_order, note).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(
                    %sales_order,
                    file_name = %note.file_name,
                    error = %e,
                    "file note upload failed"
                );
                None
            }
        }
    }

    async fn try_upload(
        &self,
        sales_order: Uuid,
        note: &NoteUpload,
    ) -> Result<Option<RemoteEntity>, ReconcileError> {
        let exists = self
            .store
            .exists(SALES_ORDER, sales_order)
            .await
            .map_err(|source| ReconcileError::Persistence {
                record_type: SALES_ORDER,
                external_id: sales_order.to_string(),
                source,
            })?;
        if !exists {
            tracing::warn!(%sales_order, "local sales order not found, upload skipped");
            return Ok(None);
        }

        let Some(order_id) = self
            .client
            .order_id_for_external(&sales_order.to_string())
            .await?
        else {
            tracing::warn!(%sales_order, "order is not in SP10, upload skipped");
            return Ok(None);
        };

        let created = self.client.upload_file_note(&order_id, note).await?;
        tracing::info!(
            %sales_order,
            order_id = %order_id,
            file_name = %note.file_name,
            created = created.is_some(),
            "file note uploaded"
        );
        Ok(created)
    }
}
