//! Schema gate between the tailer and the rest of the pipeline.
//!
//! A parsed JSON record either becomes a typed [`Event`] or is rejected
//! with a [`ValidationError`]. Rejections are counted and logged here and
//! never propagate further; a rejected record never reaches the store.

use std::sync::Arc;

use hookscope_types::{Event, HookEventType};
use serde_json::{Map, Value};
use tracing::debug;

use crate::stats::IngestStats;

/// Accepted `session_id` length range, in characters.
const SESSION_ID_LEN: std::ops::RangeInclusive<usize> = 3..=100;

/// How far in the past a timestamp may lie (one year).
const MAX_PAST_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// How far in the future a timestamp may lie (one hour).
const MAX_FUTURE_MS: i64 = 60 * 60 * 1000;

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The line parsed as JSON but not as an object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// `event_id` is missing or not a non-empty string.
    #[error("event_id must be a non-empty string")]
    EventId,

    /// `source_app` is missing or not a non-empty string.
    #[error("source_app must be a non-empty string")]
    SourceApp,

    /// `session_id` is missing or not a non-empty string.
    #[error("session_id must be a non-empty string")]
    SessionId,

    /// `session_id` length is outside the accepted range.
    #[error("session_id length {0} outside 3..=100")]
    SessionIdLength(usize),

    /// `hook_event_type` is not in the whitelist.
    #[error("unknown hook_event_type {0:?}")]
    UnknownEventType(String),

    /// `payload` is missing or not an object.
    #[error("payload must be an object")]
    Payload,

    /// `timestamp` is missing or not a number.
    #[error("timestamp must be a number")]
    TimestampType,

    /// `timestamp` lies outside `[now - 1y, now + 1h]`.
    #[error("timestamp {0} outside accepted range")]
    TimestampRange(i64),

    /// `timestamp_display` is missing or not a string.
    #[error("timestamp_display must be a string")]
    DisplayTimestamp,
}

/// Validates raw records and counts rejections.
#[derive(Debug, Clone)]
pub struct Validator {
    stats: Arc<IngestStats>,
}

impl Validator {
    /// Create a validator that records rejections into `stats`.
    pub const fn new(stats: Arc<IngestStats>) -> Self {
        Self { stats }
    }

    /// Validate a record, counting and logging a rejection.
    ///
    /// Returns `None` for rejected records.
    pub fn admit(&self, record: &Value, now_ms: i64) -> Option<Event> {
        match validate(record, now_ms) {
            Ok(event) => Some(event),
            Err(reason) => {
                self.stats.record_rejected();
                debug!(%reason, "record rejected");
                None
            }
        }
    }
}

/// Check a record against the event schema and build an [`Event`].
///
/// The returned event carries whatever `parent_event_id` the producer
/// wrote (if any), the span kind for its type, and empty derived fields.
pub fn validate(record: &Value, now_ms: i64) -> Result<Event, ValidationError> {
    let obj = record.as_object().ok_or(ValidationError::NotAnObject)?;

    let event_id = non_empty_str(obj, "event_id").ok_or(ValidationError::EventId)?;
    let source_app = non_empty_str(obj, "source_app").ok_or(ValidationError::SourceApp)?;
    let session_id = non_empty_str(obj, "session_id").ok_or(ValidationError::SessionId)?;

    let session_len = session_id.chars().count();
    if !SESSION_ID_LEN.contains(&session_len) {
        return Err(ValidationError::SessionIdLength(session_len));
    }

    let hook_event_type = match obj.get("hook_event_type") {
        Some(Value::String(name)) => HookEventType::from_wire(name)
            .ok_or_else(|| ValidationError::UnknownEventType(name.clone()))?,
        Some(other) => return Err(ValidationError::UnknownEventType(other.to_string())),
        None => return Err(ValidationError::UnknownEventType(String::new())),
    };

    let payload = obj
        .get("payload")
        .filter(|p| p.is_object())
        .ok_or(ValidationError::Payload)?;

    let timestamp = obj
        .get("timestamp")
        .and_then(epoch_millis)
        .ok_or(ValidationError::TimestampType)?;
    let earliest = now_ms.saturating_sub(MAX_PAST_MS);
    let latest = now_ms.saturating_add(MAX_FUTURE_MS);
    if timestamp < earliest || timestamp > latest {
        return Err(ValidationError::TimestampRange(timestamp));
    }

    let timestamp_display = obj
        .get("timestamp_display")
        .and_then(Value::as_str)
        .ok_or(ValidationError::DisplayTimestamp)?;

    Ok(Event {
        event_id: event_id.to_owned(),
        parent_event_id: non_empty_str(obj, "parent_event_id").map(str::to_owned),
        source_app: source_app.to_owned(),
        session_id: session_id.to_owned(),
        hook_event_type,
        payload: payload.clone(),
        timestamp,
        timestamp_display: timestamp_display.to_owned(),
        summary: obj.get("summary").and_then(Value::as_str).map(str::to_owned),
        model_name: obj
            .get("model_name")
            .and_then(Value::as_str)
            .map(str::to_owned),
        span_kind: hook_event_type.span_kind(),
        children: Vec::new(),
        depth: 0,
    })
}

/// Read a non-empty string field.
fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Interpret a JSON number as epoch milliseconds.
#[allow(clippy::cast_possible_truncation)]
fn epoch_millis(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.round() as i64)
    })
}
