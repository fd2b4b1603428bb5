use std::sync::Arc;

use uuid::Uuid;

use super::error::ReconcileError;
use super::schema::ReferenceKind;
use super::LocalStore;
use crate::sp10::client::Sp10Client;
use crate::sp10::models::{field_text, RemoteEntity};

/// Find-or-create for lookup entities keyed by their SP10 id.
pub struct ReferenceResolver<R> {
    store: Arc<R>,
    client: Sp10Client,
}

impl<R: LocalStore> ReferenceResolver<R> {
    pub fn new(store: Arc<R>, client: Sp10Client) -> Self {
        Self { store, client }
    }

    /// Local id of the reference record for `remote_id`, creating it when missing.
    ///
    /// Never fails outward: problems are logged and yield `None`.
    pub async fn resolve_or_create(
        &self,
        remote_id: Option<&str>,
        display_name: Option<&str>,
        kind: ReferenceKind,
    ) -> Option<Uuid> {
        let remote_id = remote_id?;
        match self.try_resolve(remote_id, display_name, kind).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    kind = kind.record_type(),
                    remote_id,
                    error = %e,
                    "reference left empty"
                );
                None
            }
        }
    }

    async fn try_resolve(
        &self,
        remote_id: &str,
        display_name: Option<&str>,
        kind: ReferenceKind,
    ) -> Result<Uuid, ReconcileError> {
        let record_type = kind.record_type();
        let failed = |reason: String| ReconcileError::ReferenceResolution {
            kind: record_type,
            remote_id: remote_id.to_string(),
            reason,
        };

        let matches = self
            .store
            .find_active_by_external_id(record_type, remote_id)
            .await
            .map_err(|e| failed(e.to_string()))?;

        match matches.as_slice() {
            [id] => return Ok(*id),
            [] => {}
            several => {
                return Err(ReconcileError::AmbiguousMatch {
                    record_type,
                    external_id: remote_id.to_string(),
                    count: several.len(),
                })
            }
        }

        let name = match display_name {
            Some(name) => name.to_string(),
            None => self.remote_name(remote_id, kind).await,
        };

        let id = self
            .store
            .insert_or_fetch(record_type, remote_id, &name)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tracing::debug!(kind = record_type, remote_id, %id, name = %name, "reference resolved");
        Ok(id)
    }

    /// Name from the user-defined list API; the remote id when nothing better is known.
    async fn remote_name(&self, remote_id: &str, kind: ReferenceKind) -> String {
        match self.client.list_value_name(remote_id).await {
            Ok(Some(name)) => name,
            Ok(None) => remote_id.to_string(),
            Err(e) => {
                tracing::warn!(
                    kind = kind.record_type(),
                    remote_id,
                    error = %e,
                    "list value lookup failed, naming reference by id"
                );
                remote_id.to_string()
            }
        }
    }
}

/// "First Last" when both are present, otherwise the employee number.
pub fn user_display_name(user: &RemoteEntity) -> Option<String> {
    match (field_text(user, "FirstName"), field_text(user, "LastName")) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        _ => field_text(user, "EmployeeNumber"),
    }
}
