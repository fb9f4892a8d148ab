//! WebSocket endpoint of the control plane.
//!
//! One connection = one client table entry in the hub plus a writer task
//! draining that client's outbound channel. Incoming traffic is the tiny
//! client protocol: `ping` (answered with `pong`) and `subscribe`
//! (acknowledged; the server does not filter by topic yet).

mod hub;

pub use hub::{Envelope, TelemetryHub, BATCH_INTERVAL, BATCH_MAX_MESSAGES, STATS_DEBOUNCE};

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::http::AppState;

/// Client-to-server message.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<TelemetryHub>) {
    let client_id = format!("client_{}", nanoid::nanoid!(8));
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    hub.register_client(client_id.clone(), sender);
    info!(client_id = %client_id, "websocket client connected");

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => handle_client_message(&hub, &client_id, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {
                // Protocol pings are answered by the stack; binary is not
                // part of the client protocol.
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "websocket read failed");
                break;
            }
        }
    }

    hub.unregister_client(&client_id);
    writer.abort();
    info!(client_id = %client_id, "websocket client disconnected");
}

fn handle_client_message(hub: &Arc<TelemetryHub>, client_id: &str, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "unparsable websocket message");
            return;
        }
    };

    match message.kind.as_str() {
        "ping" => hub.send_to(client_id, &Envelope::new("pong", json!({}))),
        "subscribe" => {
            // Accepted and acknowledged; no topic filtering yet.
            hub.send_to(
                client_id,
                &Envelope::new("subscribed", json!({ "topics": message.data })),
            );
        }
        other => debug!(client_id = %client_id, kind = %other, "ignoring websocket message"),
    }
}
