use serde::Deserialize;
use serde_json::{Map, Value};

/// A loosely-typed entity as returned by the SP10 API.
pub type RemoteEntity = Map<String, Value>;

/// `{ "d": { ... } }` wrapper around every SP10 response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub d: ODataPage,
}

#[derive(Debug, Default, Deserialize)]
pub struct ODataPage {
    #[serde(default)]
    pub results: Vec<RemoteEntity>,
    #[serde(rename = "__next", default)]
    pub next: Option<String>,
    #[serde(rename = "__clock", default)]
    pub clock: Option<String>,
}

/// Body and headers of a downloaded attachment.
#[derive(Debug, Clone)]
pub struct AttachmentDownload {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub bytes: Vec<u8>,
}

/// A file note pushed from the local side to an SP10 order.
#[derive(Debug, Clone)]
pub struct NoteUpload {
    pub file_name: String,
    pub description: String,
    pub content_type: String,
    pub contents: Vec<u8>,
}

/// Render an id-like JSON value as a string. Numbers and non-blank strings count;
/// null, blanks and structured values do not.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// `entity[key]` as an id string.
pub fn field_id(entity: &RemoteEntity, key: &str) -> Option<String> {
    entity.get(key).and_then(id_string)
}

/// `entity[key]` as a non-blank string.
pub fn field_text(entity: &RemoteEntity, key: &str) -> Option<String> {
    match entity.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Expanded navigation property, e.g. `AppointmentStatus`.
pub fn nested<'a>(entity: &'a RemoteEntity, key: &str) -> Option<&'a RemoteEntity> {
    entity.get(key).and_then(Value::as_object)
}
