//! WebSocket transport for the relay
//!
//! One task per browser connection. The first accepted `join` fixes the
//! session for the rest of the connection; `data` and `resize` frames are
//! routed to that session only.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sg_core::error::{GatewayError, SessionError};
use sg_protocol::{ClientEvent, ServerEvent, SessionId, TerminalSize};

use super::Relay;
use crate::session::ViewerId;
use crate::state::GatewayState;

type WsSink = SplitSink<WebSocket, Message>;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    let relay = Arc::clone(&state.relay);
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| serve_viewer(socket, relay, shutdown))
}

/// Run one viewer connection to completion
pub async fn serve_viewer(socket: WebSocket, relay: Arc<Relay>, shutdown: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut joined: Option<(SessionId, ViewerId)> = None;
    let mut events: Option<mpsc::Receiver<ServerEvent>> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event = match ClientEvent::parse(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::debug!("Ignoring unparsable frame: {}", e);
                            continue;
                        }
                    };

                    match (event, joined) {
                        (ClientEvent::Join { token }, None) => match relay.join(&token) {
                            Ok(viewer) => {
                                joined = Some((viewer.session_id, viewer.viewer_id));
                                events = Some(viewer.events);
                            }
                            Err(e) => {
                                tracing::info!("Join rejected: {}", e);
                                reject(&mut ws_tx, &e).await;
                                break;
                            }
                        },
                        (ClientEvent::Join { .. }, Some((session_id, _))) => {
                            tracing::warn!("Ignoring second join on a connection bound to {}", session_id);
                        }
                        (ClientEvent::Data { data }, Some((session_id, _))) => {
                            relay.data(session_id, data).await;
                        }
                        (ClientEvent::Resize { rows, cols }, Some((session_id, _))) => {
                            relay.resize(session_id, TerminalSize::new(rows, cols)).await;
                        }
                        (_, None) => {
                            tracing::warn!("Dropping event received before join");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            },

            event = next_event(&mut events) => match event {
                Some(event) => {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Session terminated (diagnostic already delivered) or
                    // this viewer was detached for falling behind
                    let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "viewer detached".into(),
                    }))).await;
                    break;
                }
            },

            // Joined viewers are closed by session teardown instead
            _ = shutdown.cancelled(), if events.is_none() => {
                let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                }))).await;
                break;
            }
        }
    }

    if let Some((session_id, viewer_id)) = joined {
        relay.leave(session_id, viewer_id);
    }
}

/// Next queued event, or never if not joined yet
async fn next_event(
    events: &mut Option<mpsc::Receiver<ServerEvent>>,
) -> Option<ServerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    match event.to_json() {
        Ok(json) => ws_tx.send(Message::Text(json)).await,
        Err(e) => {
            tracing::error!("Failed to encode {:?}: {}", event, e);
            Ok(())
        }
    }
}

/// Send the join failure and close
async fn reject(ws_tx: &mut WsSink, err: &GatewayError) {
    let message = match err {
        GatewayError::Auth(e) => format!("Authentication failed: {}", e),
        GatewayError::Session(SessionError::NotFound(_)) => "Session not found".to_string(),
        other => other.to_string(),
    };

    let _ = send_event(ws_tx, &ServerEvent::Error(message)).await;
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "join rejected".into(),
        })))
        .await;
}
