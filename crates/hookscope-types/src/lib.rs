//! Shared type definitions for hookscope.
//!
//! This crate is the single source of truth for the records that flow
//! from the log tailer through the hierarchy resolver and event store
//! out to stream observers. Types flow downstream to `TypeScript` via
//! `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for server-minted identifiers
//! - [`enums`] -- Hook event types and span kinds
//! - [`structs`] -- Events, stream messages, and query responses

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{HookEventType, SpanKind};
pub use ids::ObserverId;
pub use structs::{Event, FilterOptions, HealthReport, StreamMessage};
