//! REST API endpoint handlers for the Observer server.
//!
//! All handlers read the in-memory event window via the shared
//! [`AppState`]. Nothing here touches the log files or the session store.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/events/recent` | Most recent events, newest first |
//! | `GET` | `/events/filter-options` | Distinct sources, sessions, and types |
//! | `GET` | `/events/{id}` | Single event from the window |
//! | `GET` | `/health` | Ingestion counters |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};

use crate::error::ObserverError;
use crate::state::AppState;

/// Events returned by `/events/recent` when no limit is given.
pub const DEFAULT_RECENT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the `GET /events/recent` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct RecentQuery {
    /// Maximum number of events to return (default 100, capped at the
    /// window size).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing ingestion status and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health().await;
    let window = health.window_size;
    let observers = health.observers;
    let accepted = health.accepted;
    let rejected = health.rejected;
    let malformed = health.malformed_lines;

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Hookscope</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #3fb950; font-weight: bold; }}
    </style>
</head>
<body>
    <h1>Hookscope</h1>
    <p class="subtitle">Hook event stream observer</p>

    <p>Status: <span class="status">RUNNING</span></p>

    <div>
        <div class="metric"><div class="label">Window</div><div class="value">{window}</div></div>
        <div class="metric"><div class="label">Observers</div><div class="value">{observers}</div></div>
        <div class="metric"><div class="label">Accepted</div><div class="value">{accepted}</div></div>
        <div class="metric"><div class="label">Rejected</div><div class="value">{rejected}</div></div>
        <div class="metric"><div class="label">Malformed</div><div class="value">{malformed}</div></div>
    </div>

    <h2>API Endpoints</h2>
    <ul>
        <li><a href="/events/recent">/events/recent</a> (?limit=N)</li>
        <li><a href="/events/filter-options">/events/filter-options</a></li>
        <li><a href="/health">/health</a></li>
        <li><code>ws://host:port/stream</code> live event stream</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// GET /events/recent
// ---------------------------------------------------------------------------

/// Return the most recent events, newest first.
///
/// # Query Parameters
///
/// - `limit`: number of events (default 100, clamped to the window size,
///   must be at least 1)
pub async fn recent_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let requested = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if requested == 0 {
        return Err(ObserverError::InvalidQuery(String::from(
            "limit must be at least 1",
        )));
    }

    let store = state.store.read().await;
    let limit = requested.min(store.capacity());
    Ok(Json(store.snapshot(limit)))
}

// ---------------------------------------------------------------------------
// GET /events/filter-options
// ---------------------------------------------------------------------------

/// Distinct source apps, a capped sample of session ids, and the event
/// types currently in the window.
pub async fn filter_options(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.filter_options().await)
}

// ---------------------------------------------------------------------------
// GET /events/{id}
// ---------------------------------------------------------------------------

/// Return a single event, including its derived children and depth.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    state
        .event(&id)
        .await
        .map(Json)
        .ok_or_else(|| ObserverError::NotFound(format!("event {id}")))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Ingestion counters, window size, and connected observer count.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health().await)
}
