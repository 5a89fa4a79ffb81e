use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::gateway::GatewayResponse;
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Header carrying the upstream-resolved identity
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_user_id = query.user_id.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let user_id = extract_user_id(&query, &headers);
    ws.max_message_size(state.settings.gateway.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// User id from the query string, then from the identity header
fn extract_user_id(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref user_id) = query.user_id {
        return Some(user_id.clone());
    }

    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn encode(response: &GatewayResponse) -> Option<Message> {
    match serde_json::to_string(response) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize gateway response");
            None
        }
    }
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state, user_id))]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let connection_id = Uuid::new_v4().to_string();
    let connection_start = std::time::Instant::now();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let connected = state
        .gateway
        .on_connect(&connection_id, user_id.as_deref())
        .await;
    if let Some(msg) = encode(&connected) {
        let _ = ws_sender.send(msg).await;
    }
    if !connected.is_success() {
        tracing::warn!(connection_id = %connection_id, "Connection rejected");
        let _ = ws_sender.close().await;
        return;
    }

    ConnectionMetrics::record_opened();

    // Channel for responses to this connection
    let (tx, mut rx) = mpsc::channel::<GatewayResponse>(CHANNEL_BUFFER_SIZE);

    // Task for sending responses from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let Some(msg) = encode(&response) else {
                continue;
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving frames from WebSocket
    let gateway = state.gateway.clone();
    let recv_connection_id = connection_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            let response = match result {
                Ok(Message::Text(text)) => gateway.on_message(&recv_connection_id, text.as_str()).await,
                Ok(Message::Binary(_)) => GatewayResponse::InvalidMessage {
                    connection_id: recv_connection_id.clone(),
                    reason: "Binary messages are not supported".to_string(),
                },
                // Axum answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %recv_connection_id, "Received close frame");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %recv_connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            };

            if tx.send(response).await.is_err() {
                break;
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    state.gateway.on_disconnect(&connection_id).await;

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}
