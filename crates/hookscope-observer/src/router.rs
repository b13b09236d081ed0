//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /stream` -- `WebSocket` event stream
/// - `GET /events/recent` -- newest-first events
/// - `GET /events/filter-options` -- distinct filter values
/// - `GET /events/{id}` -- single event
/// - `GET /health` -- ingestion counters
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/stream", get(ws::ws_stream))
        .route("/events/recent", get(handlers::recent_events))
        .route("/events/filter-options", get(handlers::filter_options))
        .route("/events/{id}", get(handlers::get_event))
        .route("/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
