//! WebSocket endpoint for real-time new-message notifications

use crate::api::handlers::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub mailbox_id: i64,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.mailbox_id))
}

/// Pump hub notifications for one mailbox to the client until either
/// side disconnects
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mailbox_id: i64) {
    info!("New WebSocket subscriber for mailbox {}", mailbox_id);

    let (mut sender, mut receiver) = socket.split();
    let mut notices = state.hub.subscribe();

    loop {
        tokio::select! {
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => {
                        if notice.mailbox_id != mailbox_id {
                            continue;
                        }
                        let json = match serde_json::to_string(&notice) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode notification: {}", e);
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            debug!("WebSocket send failed, client gone");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "WebSocket subscriber for mailbox {} lagged, {} notifications dropped",
                            mailbox_id, skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    // Pings are answered by axum; other frames are ignored
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection for mailbox {} closed", mailbox_id);
}
