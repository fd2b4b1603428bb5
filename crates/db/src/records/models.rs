use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed field value as stored on a local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Reference(Uuid),
    /// Multi-select style reference; only a single element counts as a value.
    References(Vec<Uuid>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn from_option<T: Into<FieldValue>>(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }

    pub fn as_reference(&self) -> Option<Uuid> {
        match self {
            FieldValue::Reference(id) => Some(*id),
            FieldValue::References(ids) if ids.len() == 1 => Some(ids[0]),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Reference(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// A persisted record in the local store.
///
/// `id` is the local storage key; `external_id` is the stable remote identifier
/// used to locate the record again on the next sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: Uuid,
    pub record_type: String,
    pub external_id: Option<String>,
    pub is_inactive: bool,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    /// A fresh, unsaved record of the given type.
    pub fn new(record_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            record_type: record_type.to_owned(),
            external_id: None,
            is_inactive: false,
            fields: FieldMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(field.to_owned(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}
