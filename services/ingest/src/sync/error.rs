use fieldsync_common::error::FieldsyncError;

use crate::sp10::client::Sp10ClientError;

/// Why a single entity (or a fetch) did not go through.
///
/// None of these cross an entity boundary: workers log them and move on.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("fetch aborted: {0}")]
    TransientFetch(#[from] Sp10ClientError),

    #[error("could not load {record_type} {id}: {source}")]
    RecordNotFoundOnLoad {
        record_type: &'static str,
        id: uuid::Uuid,
        source: FieldsyncError,
    },

    #[error("could not resolve {kind} reference {remote_id}: {reason}")]
    ReferenceResolution {
        kind: &'static str,
        remote_id: String,
        reason: String,
    },

    #[error("could not persist {record_type} {external_id}: {source}")]
    Persistence {
        record_type: &'static str,
        external_id: String,
        source: FieldsyncError,
    },

    #[error("{count} active {record_type} records share external id {external_id}")]
    AmbiguousMatch {
        record_type: &'static str,
        external_id: String,
        count: usize,
    },

    #[error("invalid remote entity: {0}")]
    InvalidEntity(String),
}

impl ReconcileError {
    /// Skips are expected data conditions; everything else counts as an error.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ReconcileError::AmbiguousMatch { .. } | ReconcileError::InvalidEntity(_)
        )
    }
}
