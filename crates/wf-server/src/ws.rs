use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use wf_types::{ServerEventData, ServerEventEnvelope};

use crate::AppState;

/// `WS /socket/{plan_id}?user_id=…` (spec.md §6.2). Grounded on the
/// teacher's `pty_ws`/`pty_ws_stream` `WebSocketUpgrade`/`on_upgrade` pair,
/// adapted from a poll loop to a broadcast-subscriber forwarding loop.
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Query(_params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_stream(socket, state, plan_id))
}

async fn socket_stream(mut socket: WebSocket, state: AppState, plan_id: String) {
    let (backlog, mut rx) = state.fanout.subscribe(&plan_id).await;
    for event in backlog {
        if send_envelope(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if is_ping(&text) {
                            let pong = ServerEventEnvelope::new(ServerEventData::Pong);
                            if send_envelope(&mut socket, &pong).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
            broadcast = rx.recv() => {
                match broadcast {
                    Ok(event) => {
                        if send_envelope(&mut socket, &event).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(plan_id = %plan_id, skipped, "slow subscriber exceeded high-water mark, disconnecting");
                        return;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|s| s == "ping"))
        .unwrap_or(false)
}

async fn send_envelope(socket: &mut WebSocket, event: &ServerEventEnvelope) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).expect("envelope always serializes");
    socket.send(WsMessage::Text(payload.into())).await
}
