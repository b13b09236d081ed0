//! Core record types: events, stream messages, and query responses.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{HookEventType, SpanKind};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One immutable occurrence emitted by a producer process.
///
/// `event_id`, `source_app`, `session_id`, `hook_event_type`, `payload`,
/// the timestamps, and the optional descriptive fields come from the log
/// line. `parent_event_id` and `span_kind` are attached by the hierarchy
/// resolver. `children` and `depth` are derived by the event store over
/// the current window and are never trusted from input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Globally unique, producer-assigned identifier.
    pub event_id: String,
    /// Weak reference to the parent event. May dangle.
    #[serde(default)]
    pub parent_event_id: Option<String>,
    /// Application that produced the event.
    pub source_app: String,
    /// Session this event belongs to.
    pub session_id: String,
    /// Kind of hook that fired.
    pub hook_event_type: HookEventType,
    /// Opaque hook payload, never interpreted beyond correlation ids.
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
    /// Emission time in epoch milliseconds.
    pub timestamp: i64,
    /// Human-readable emission time as formatted by the producer.
    pub timestamp_display: String,
    /// Optional short summary written by the producer.
    #[serde(default)]
    pub summary: Option<String>,
    /// Optional model name reported by the producer.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Span classification derived from `hook_event_type`.
    pub span_kind: SpanKind,
    /// Ids of events in the window whose parent is this event.
    #[serde(default)]
    pub children: Vec<String>,
    /// Distance from the nearest ancestor with no resolvable parent.
    #[serde(default)]
    pub depth: u32,
}

// ---------------------------------------------------------------------------
// Stream protocol
// ---------------------------------------------------------------------------

/// A message pushed to stream observers.
///
/// Serializes as `{"type": "initial", "data": [...]}` or
/// `{"type": "event", "data": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum StreamMessage {
    /// The current window, sent once on connect.
    Initial(Vec<Event>),
    /// One accepted batch, sent after the initial snapshot.
    Event(Vec<Event>),
}

// ---------------------------------------------------------------------------
// Query responses
// ---------------------------------------------------------------------------

/// Distinct values present in the window, for observer-side filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FilterOptions {
    /// Distinct source applications, sorted.
    pub source_apps: Vec<String>,
    /// Capped sample of session ids, most recently seen first.
    pub session_ids: Vec<String>,
    /// Distinct event types, in declaration order.
    pub hook_event_types: Vec<HookEventType>,
}

/// Ingestion health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HealthReport {
    /// Always `"ok"` while the process is serving.
    pub status: String,
    /// Complete lines read from log files.
    pub lines_read: u64,
    /// Lines that were not valid JSON.
    pub malformed_lines: u64,
    /// Records rejected by the validator.
    pub rejected: u64,
    /// Events accepted into the window.
    pub accepted: u64,
    /// Events currently held in the window.
    pub window_size: usize,
    /// Currently connected stream observers.
    pub observers: usize,
    /// Wall-clock epoch milliseconds of the last accepted event.
    pub last_accepted_at: Option<i64>,
}
