use std::sync::Arc;

use uuid::Uuid;

use fieldsync_db::records::models::FieldValue;

use super::error::ReconcileError;
use super::schema::{APPOINTMENT, CALENDAR_EVENT};
use super::LocalStore;
use crate::sp10::models::{field_id, RemoteEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(Uuid),
    NotFound,
}

/// Removes local appointments that SP10 reports as deleted, together with the
/// calendar event linked to them.
pub struct DeletionPropagator<R> {
    store: Arc<R>,
}

impl<R: LocalStore> DeletionPropagator<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    pub async fn delete_by_remote_id(
        &self,
        item: &RemoteEntity,
    ) -> Result<DeleteOutcome, ReconcileError> {
        let record_type = APPOINTMENT.record_type;
        let external_id = field_id(item, "Id")
            .ok_or_else(|| ReconcileError::InvalidEntity("deleted appointment without Id".into()))?;
        let persistence = |source| ReconcileError::Persistence {
            record_type,
            external_id: external_id.clone(),
            source,
        };

        let matches = self
            .store
            .find_active_by_external_id(record_type, &external_id)
            .await
            .map_err(persistence)?;

        let id = match matches.as_slice() {
            [id] => *id,
            [] => {
                tracing::debug!(external_id = %external_id, "nothing to delete");
                return Ok(DeleteOutcome::NotFound);
            }
            several => {
                return Err(ReconcileError::AmbiguousMatch {
                    record_type,
                    external_id: external_id.clone(),
                    count: several.len(),
                })
            }
        };

        // Dependent first; its failure does not block the appointment delete.
        match self.store.load(record_type, id).await {
            Ok(record) => {
                if let Some(event) = record.get("linked_event").and_then(FieldValue::as_reference) {
                    match self.store.delete(CALENDAR_EVENT, event).await {
                        Ok(()) => tracing::debug!(%event, "linked calendar event deleted"),
                        Err(e) => {
                            tracing::error!(%event, appointment = %id, error = %e, "calendar event delete failed")
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "could not read linked event, deleting appointment only")
            }
        }

        self.store
            .delete(record_type, id)
            .await
            .map_err(persistence)?;
        tracing::info!(%id, external_id = %external_id, "appointment deleted");
        Ok(DeleteOutcome::Deleted(id))
    }
}
