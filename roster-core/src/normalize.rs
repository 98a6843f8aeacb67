//! Boundary normalization for records read from untyped storage.
//!
//! Both the local store and the remote store hand raw JSON to [`normalize`];
//! nothing downstream ever sees a partially-shaped record.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::RecordError;
use crate::types::{normalize_email, AgeGroup, ChildId, ChildRecord, ParentId};

/// Turn one raw JSON value into a [`ChildRecord`].
///
/// `id` and `parentId` are required. `age` may be a number or a numeric
/// string. `ageGroup` is always recomputed from `age`; a missing or
/// unparseable `createdAt` becomes the Unix epoch.
pub fn normalize(raw: &Value) -> Result<ChildRecord, RecordError> {
    let obj = raw.as_object().ok_or(RecordError::NotAnObject)?;

    let id = required_str(obj, "id")?;
    let parent_id = required_str(obj, "parentId")?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let age = parse_age(obj.get("age"))?;
    let created_at = obj
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();

    Ok(ChildRecord {
        id: ChildId::from(id),
        name,
        age,
        age_group: AgeGroup::for_age(age),
        parent_id: ParentId::from(parent_id),
        parent_email: optional_str(obj, "parentEmail").and_then(|e| normalize_email(&e)),
        created_at,
        avatar: optional_str(obj, "avatar"),
    })
}

/// Normalize a JSON array, skipping (and logging) entries that fail.
///
/// Anything that is not an array yields an empty list.
pub fn normalize_list(raw: &Value) -> Vec<ChildRecord> {
    let Some(items) = raw.as_array() else {
        tracing::warn!("stored child list is not a JSON array; treating as empty");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match normalize(item) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed child record");
                None
            }
        })
        .collect()
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(RecordError::MissingField(field)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(RecordError::InvalidField {
            field,
            reason: "empty string".to_string(),
        }),
        Some(other) => Err(RecordError::InvalidField {
            field,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn optional_str(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_age(value: Option<&Value>) -> Result<u32, RecordError> {
    let invalid = |reason: String| RecordError::InvalidField { field: "age", reason };
    match value {
        None | Some(Value::Null) => Err(RecordError::MissingField("age")),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid(format!("not a non-negative integer: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(format!("'{s}': {e}"))),
        Some(other) => Err(invalid(format!("unexpected value {other}"))),
    }
}
