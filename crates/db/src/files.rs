use std::path::{Path, PathBuf};

use async_trait::async_trait;

use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

/// Storage for downloaded attachment files.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `contents` under `name` and return the id the file can be referenced by.
    async fn save(&self, name: &str, contents: &[u8]) -> FieldsyncResult<String>;
}

/// Writes files into a single folder on local disk. The returned id is the file name.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Strip anything that would let a remote-supplied name escape the folder.
fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, name: &str, contents: &[u8]) -> FieldsyncResult<String> {
        let file_name = sanitize_file_name(name)
            .ok_or_else(|| FieldsyncError::Validation(format!("invalid file name: {name:?}")))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FieldsyncError::Internal(format!("create {}: {e}", self.root.display())))?;

        let path = self.root.join(&file_name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| FieldsyncError::Internal(format!("write {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), bytes = contents.len(), "file saved");
        Ok(file_name)
    }
}
