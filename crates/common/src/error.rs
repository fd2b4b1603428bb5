use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FieldsyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FieldsyncError::NotFound(_))
    }
}

pub type FieldsyncResult<T> = Result<T, FieldsyncError>;
