//! Validation of client-submitted events.
use crate::window::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use directory::types::EventRow;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

pub const NOT_AN_OBJECT: &str = "Event must be an object.";
pub const INVALID_EVENT_ID: &str = "event_id must be a valid UUID.";
pub const MISSING_EVENT_NAME: &str = "event_name is required.";
pub const INVALID_OCCURRED_AT: &str = "occurred_at must be a valid ISO date string.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventRejection {
    pub index: usize,
    pub reason: &'static str,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedBatch {
    pub rows: Vec<EventRow>,
    pub errors: Vec<EventRejection>,
}

/// The event list of a request body: either a bare array or `{"events": [...]}`.
pub fn extract_events(payload: JsonValue) -> Option<Vec<JsonValue>> {
    match payload {
        JsonValue::Array(events) => Some(events),
        JsonValue::Object(mut body) => match body.remove("events") {
            Some(JsonValue::Array(events)) => Some(events),
            _ => None,
        },
        _ => None,
    }
}

/// Validates each event independently. Rejections keep the event's position
/// in the submitted list.
pub fn validate_events(tenant_id: &str, events: &[JsonValue], now: DateTime<Utc>) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();
    for (index, event) in events.iter().enumerate() {
        match validate_event(tenant_id, event, now) {
            Ok(row) => batch.rows.push(row),
            Err(reason) => batch.errors.push(EventRejection { index, reason }),
        }
    }
    batch
}

fn validate_event(
    tenant_id: &str,
    event: &JsonValue,
    now: DateTime<Utc>,
) -> Result<EventRow, &'static str> {
    let JsonValue::Object(fields) = event else {
        return Err(NOT_AN_OBJECT);
    };

    let event_id = fields
        .get("event_id")
        .and_then(JsonValue::as_str)
        .filter(|id| is_valid_event_id(id))
        .ok_or(INVALID_EVENT_ID)?;

    let event_name = optional_string(fields, "event_name").ok_or(MISSING_EVENT_NAME)?;

    let occurred_at = parse_occurred_at(fields.get("occurred_at"), now).ok_or(INVALID_OCCURRED_AT)?;

    let properties = match fields.get("properties") {
        Some(JsonValue::Object(properties)) => properties.clone(),
        _ => Map::new(),
    };

    Ok(EventRow {
        event_id: event_id.to_string(),
        tenant_id: tenant_id.to_string(),
        project_id: optional_string(fields, "project_id"),
        event_name,
        occurred_at,
        user_id: optional_string(fields, "user_id"),
        session_id: optional_string(fields, "session_id"),
        properties,
    })
}

/// A trimmed, non-empty string field.
fn optional_string(fields: &Map<String, JsonValue>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

/// Missing, null and empty mean "now". Strings are parsed as timestamps and
/// numbers as epoch milliseconds.
fn parse_occurred_at(value: Option<&JsonValue>, now: DateTime<Utc>) -> Option<String> {
    let parsed = match value {
        None | Some(JsonValue::Null) => now,
        Some(JsonValue::String(s)) if s.trim().is_empty() => now,
        Some(JsonValue::String(s)) => parse_timestamp(s)?,
        Some(JsonValue::Number(n)) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis)?
        }
        Some(_) => return None,
    };
    Some(format_timestamp(&parsed))
}

/// `8-4-4-4-12` hex with a version nibble of 1 to 5 and the RFC 4122 variant.
pub fn is_valid_event_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return false;
    }

    bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        14 => (b'1'..=b'5').contains(b),
        19 => matches!(*b, b'8' | b'9' | b'a' | b'b' | b'A' | b'B'),
        _ => b.is_ascii_hexdigit(),
    })
}
