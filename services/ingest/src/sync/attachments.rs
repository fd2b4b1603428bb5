use std::sync::Arc;

use uuid::Uuid;

use fieldsync_db::files::FileStore;
use fieldsync_db::records::models::{FieldMap, FieldValue};

use super::error::ReconcileError;
use super::schema::ORDER_NOTE;
use super::LocalStore;
use crate::sp10::client::Sp10Client;

/// File types the local store accepts for note attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Autocad,
    Bitmap,
    Csv,
    Excel,
    Flash,
    Gif,
    Gzip,
    Html,
    Icon,
    Javascript,
    Jpeg,
    Json,
    Message,
    Mp3,
    Mpeg,
    MsProject,
    Pdf,
    ProgressiveJpeg,
    PlainText,
    Png,
    Postscript,
    Powerpoint,
    Quicktime,
    Rtf,
    Sms,
    Stylesheet,
    Tiff,
    Visio,
    Word,
    Xml,
    Zip,
}

/// Known file type for a `Content-Type` value. Parameters such as `charset` are ignored.
pub fn file_type_for_mime(content_type: &str) -> Option<FileType> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let file_type = match mime.as_str() {
        "application/x-autocad" => FileType::Autocad,
        "image/x-xbitmap" => FileType::Bitmap,
        "text/csv" => FileType::Csv,
        "application/vnd.ms-excel" => FileType::Excel,
        "application/x-shockwave-flash" => FileType::Flash,
        "image/gif" => FileType::Gif,
        "application/x-gzip-compressed" | "application/x-gzip" | "application/gzip" => {
            FileType::Gzip
        }
        "text/html" => FileType::Html,
        "image/ico" => FileType::Icon,
        "text/javascript" => FileType::Javascript,
        "image/jpeg" => FileType::Jpeg,
        "application/json" => FileType::Json,
        "message/rfc822" => FileType::Message,
        "audio/mpeg" => FileType::Mp3,
        "video/mpeg" => FileType::Mpeg,
        "application/vnd.ms-project" => FileType::MsProject,
        "application/pdf" => FileType::Pdf,
        "image/pjpeg" => FileType::ProgressiveJpeg,
        "text/plain" => FileType::PlainText,
        "image/x-png" | "image/png" => FileType::Png,
        "application/postscript" => FileType::Postscript,
        "application/vnd.ms-powerpoint" => FileType::Powerpoint,
        "video/quicktime" => FileType::Quicktime,
        "application/rtf" => FileType::Rtf,
        "application/sms" => FileType::Sms,
        "text/css" => FileType::Stylesheet,
        "image/tiff" => FileType::Tiff,
        "application/vnd.visio" => FileType::Visio,
        "application/msword" => FileType::Word,
        "text/xml" => FileType::Xml,
        "application/zip" => FileType::Zip,
        _ => return None,
    };
    Some(file_type)
}

/// `Content-Type` to send for a local file, guessed from its extension.
pub fn content_type_for_name(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "text/xml",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "rtf" => "application/rtf",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
    }
}

/// The quoted `filename="..."` parameter of a `Content-Disposition` header.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=\"")?;
    let (name, _) = rest.split_once('"')?;
    (!name.is_empty()).then(|| name.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// File id written onto the note.
    Stored(String),
    Skipped(&'static str),
}

/// Downloads note attachments into the file store and links them to their note.
pub struct AttachmentDownloader<R> {
    store: Arc<R>,
    client: Sp10Client,
    files: Option<Arc<dyn FileStore>>,
}

impl<R: LocalStore> AttachmentDownloader<R> {
    pub fn new(store: Arc<R>, client: Sp10Client, files: Option<Arc<dyn FileStore>>) -> Self {
        Self {
            store,
            client,
            files,
        }
    }

    pub async fn fetch_for_note(&self, note_id: Uuid) -> Result<AttachmentOutcome, ReconcileError> {
        let record_type = ORDER_NOTE.record_type;
        let persistence = |source| ReconcileError::Persistence {
            record_type,
            external_id: note_id.to_string(),
            source,
        };

        let names = ["attachment_id".to_string(), "attachment".to_string()];
        let current = self
            .store
            .lookup_fields(record_type, note_id, &names)
            .await
            .map_err(persistence)?;

        if current.get("attachment").is_some_and(|v| !v.is_null()) {
            return Ok(AttachmentOutcome::Skipped("already downloaded"));
        }
        let Some(attachment_id) = current
            .get("attachment_id")
            .and_then(FieldValue::as_text)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
        else {
            return Ok(AttachmentOutcome::Skipped("no attachment"));
        };

        let Some(files) = &self.files else {
            tracing::error!(%note_id, attachment_id = %attachment_id, "ATTACHMENT_DIR is not set, attachment not downloaded");
            return Ok(AttachmentOutcome::Skipped("no file store"));
        };

        let download = self.client.download_attachment(&attachment_id).await?;

        let Some(file_type) = download.content_type.as_deref().and_then(file_type_for_mime) else {
            tracing::warn!(
                attachment_id = %attachment_id,
                content_type = ?download.content_type,
                "unsupported attachment type"
            );
            return Ok(AttachmentOutcome::Skipped("unsupported file type"));
        };
        let Some(file_name) = download
            .content_disposition
            .as_deref()
            .and_then(filename_from_disposition)
        else {
            tracing::warn!(attachment_id = %attachment_id, "attachment has no file name");
            return Ok(AttachmentOutcome::Skipped("no file name"));
        };

        let name = format!("{attachment_id}_{file_name}");
        let file_id = files
            .save(&name, &download.bytes)
            .await
            .map_err(persistence)?;

        let mut update = FieldMap::new();
        update.insert("attachment".into(), FieldValue::text(file_id.clone()));
        self.store
            .submit_fields(record_type, note_id, &update)
            .await
            .map_err(persistence)?;

        tracing::info!(%note_id, file_id = %file_id, ?file_type, bytes = download.bytes.len(), "attachment stored");
        Ok(AttachmentOutcome::Stored(file_id))
    }
}
