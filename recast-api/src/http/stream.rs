//! Stream-wide control: status, start/stop all relays, ingest up/down.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::http::error::AppResult;
use crate::http::AppState;

/// GET /api/stream/status
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ingest": {
            "status": state.ingest.status(),
            "actualPath": state.ingest.actual_path(),
            "url": state.ingest.surfaced_url(),
        },
        "destinations": state.supervisor.status_snapshot(),
    }))
}

/// POST /api/stream/start: start every enabled destination.
pub async fn start_all(State(state): State<AppState>) -> Json<Value> {
    let running = state.supervisor.start_all().await;
    Json(json!({ "running": running }))
}

/// POST /api/stream/stop: stop every running relay.
pub async fn stop_all(State(state): State<AppState>) -> Json<Value> {
    state.supervisor.stop_all();
    Json(json!({ "running": 0 }))
}

/// POST /api/stream/connect: bring the ingest listener up.
pub async fn connect_ingest(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.ingest_server.start().await?;
    Ok(Json(json!({ "ingest": "up" })))
}

/// POST /api/stream/disconnect: take the ingest listener down.
pub async fn disconnect_ingest(State(state): State<AppState>) -> Json<Value> {
    state.ingest_server.shutdown();
    Json(json!({ "ingest": "down" }))
}
