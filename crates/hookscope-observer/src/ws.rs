//! `WebSocket` handler for the live event stream.
//!
//! Clients connect to `GET /stream`. The first frame is
//! `{"type": "initial", "data": [...]}` with the current window; every
//! accepted batch afterwards arrives as `{"type": "event", "data": [...]}`.
//! Anything the client sends is ignored apart from close and ping.
//!
//! When the broadcaster drops this observer (it fell behind, or the
//! server is shutting down) the channel closes and the socket is closed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming events.
///
/// # Route
///
/// `GET /stream`
pub async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: register with the broadcaster and
/// forward each payload as a text frame.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (id, mut rx) = match state.connect_observer().await {
        Ok(pair) => pair,
        Err(e) => {
            warn!("Failed to build initial snapshot: {e}");
            return;
        }
    };
    debug!(observer = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            payload = rx.recv() => {
                match payload {
                    Some(json) => {
                        let msg = Message::Text(json.as_ref().into());
                        if socket.send(msg).await.is_err() {
                            debug!(observer = %id, "WebSocket client disconnected (send failed)");
                            break;
                        }
                    }
                    None => {
                        debug!(observer = %id, "Observer dropped by broadcaster, closing socket");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => {
                        debug!(observer = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(observer = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    _ => {
                        // Inbound text and binary frames are ignored.
                    }
                }
            }
        }
    }

    state.broadcaster.unregister(id);
}
