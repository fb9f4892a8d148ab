//! Configuration endpoints: read (masked by default) and replace.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use recast_core::config::Config;
use recast_core::models::MASKED_KEY;

use crate::http::error::{AppError, AppResult};
use crate::http::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ConfigQuery {
    #[serde(default, rename = "includeKeys", alias = "include_keys")]
    include_keys: bool,
}

/// GET /api/config[?includeKeys]
pub async fn get_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> AppResult<Json<Config>> {
    let config = state.store.load().await?;
    if query.include_keys {
        Ok(Json(config))
    } else {
        Ok(Json(masked_config(config)))
    }
}

/// POST /api/config: validate, persist, invalidate caches, reconfigure
/// the supervisor, and restart the ingest listener only when its
/// `(host, port, app, key)` tuple changed.
pub async fn update_config(
    State(state): State<AppState>,
    Json(incoming): Json<Config>,
) -> AppResult<Json<Value>> {
    let mut incoming = incoming;
    incoming
        .validate()
        .map_err(AppError::validation_failed)?;
    incoming.normalize();

    let previous = state.store.load().await?;
    state.store.save(&incoming).await?;
    state.platforms_cache.invalidate();

    state
        .supervisor
        .configure(incoming.stream_manager.platforms.clone());

    let ingest_changed = previous.stream_manager.rtmp_server.endpoint_tuple()
        != incoming.stream_manager.rtmp_server.endpoint_tuple();
    if ingest_changed {
        info!("ingest endpoint changed, restarting listener");
        state
            .ingest_server
            .restart(incoming.stream_manager.rtmp_server.clone())
            .await?;
    }

    state.hub.broadcast_status();
    Ok(Json(json!({ "saved": true, "ingestRestarted": ingest_changed })))
}

/// Replace every credential with the mask. The on-disk file always keeps
/// the real keys; masking happens only on the way out of the API.
fn masked_config(mut config: Config) -> Config {
    if !config.stream_manager.rtmp_server.stream_key.is_empty() {
        config.stream_manager.rtmp_server.stream_key = MASKED_KEY.to_string();
    }
    if let Some(password) = &mut config.stream_manager.obs.password {
        *password = MASKED_KEY.to_string();
    }
    let masked_platforms = config
        .stream_manager
        .platforms
        .iter()
        .map(recast_core::models::Destination::masked)
        .collect();
    config.stream_manager.platforms = masked_platforms;
    config
}
