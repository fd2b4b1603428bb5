use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use fieldsync_db::records::models::{FieldMap, FieldValue};

use super::schema::{Coercion, RecordSchema};
use crate::sp10::models::RemoteEntity;

/// Map every remote key present in `entity` that the schema knows about.
/// Unmapped keys are dropped; nulls are kept as `FieldValue::Null`.
pub fn normalize(entity: &RemoteEntity, schema: &RecordSchema) -> FieldMap {
    schema
        .fields
        .iter()
        .filter_map(|spec| {
            entity
                .get(spec.remote)
                .map(|raw| (spec.local.to_string(), coerce(raw, spec.coercion)))
        })
        .collect()
}

pub fn coerce(value: &Value, coercion: Coercion) -> FieldValue {
    match coercion {
        Coercion::Auto => coerce_auto(value),
        Coercion::Text => match value {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        },
    }
}

fn coerce_auto(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => n
            .as_f64()
            .map(FieldValue::Number)
            .unwrap_or_else(|| FieldValue::Text(n.to_string())),
        Value::String(s) => match s.as_str() {
            "True" => FieldValue::Bool(true),
            "False" => FieldValue::Bool(false),
            _ => parse_remote_date(s)
                .map(FieldValue::Timestamp)
                .unwrap_or_else(|| FieldValue::Text(s.clone())),
        },
        // Structured values have no column of their own; keep the JSON text.
        other => FieldValue::Text(other.to_string()),
    }
}

/// `2020-11-30T08:00:00Z` and nothing looser.
pub fn parse_remote_date(s: &str) -> Option<DateTime<Utc>> {
    let b = s.as_bytes();
    let shape_ok = b.len() == 20
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            10 => *c == b'T',
            13 | 16 => *c == b':',
            19 => *c == b'Z',
            _ => c.is_ascii_digit(),
        });
    if !shape_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}
