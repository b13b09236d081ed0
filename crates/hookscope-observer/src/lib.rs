//! Observer API server for hookscope.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/stream`) sending the current window as
//!   an `initial` message, then each accepted batch as an `event` message
//! - **REST endpoints** for recent events, filter options, single events,
//!   and ingestion health
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! [`AppState`] owns the hierarchy resolver, the bounded event window,
//! and the [`Broadcaster`]. The tailer feeds validated batches into
//! [`AppState::run_ingest`]; each batch is resolved, appended, and fanned
//! out to observers through per-observer bounded channels so that one
//! slow client never delays the others.
//!
//! [`Broadcaster`]: broadcaster::Broadcaster

pub mod broadcaster;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use broadcaster::{Broadcaster, OBSERVER_BUFFER, Payload};
pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
