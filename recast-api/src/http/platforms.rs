//! Destination (platform) endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    Json,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

use recast_core::models::Destination;

use crate::http::error::AppResult;
use crate::http::validation::validate_destination_id;
use crate::http::AppState;

/// TTL of the platform list cache.
pub const PLATFORMS_CACHE_TTL: Duration = Duration::from_secs(1);

/// One-entry TTL cache for the destination list. Mutations invalidate.
#[derive(Default)]
pub struct PlatformsCache {
    entry: Mutex<Option<(Instant, Vec<Destination>)>>,
}

impl PlatformsCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn get(&self) -> Option<Vec<Destination>> {
        let guard = self.entry.lock();
        match guard.as_ref() {
            Some((at, list)) if at.elapsed() < PLATFORMS_CACHE_TTL => Some(list.clone()),
            _ => None,
        }
    }

    fn put(&self, list: Vec<Destination>) {
        *self.entry.lock() = Some((Instant::now(), list));
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }
}

/// GET /api/platforms: destinations with stream keys masked.
pub async fn list(State(state): State<AppState>) -> Json<Vec<Destination>> {
    let destinations = match state.platforms_cache.get() {
        Some(cached) => cached,
        None => {
            let fresh = state.supervisor.destinations();
            state.platforms_cache.put(fresh.clone());
            fresh
        }
    };
    Json(destinations.iter().map(Destination::masked).collect())
}

/// POST /api/platforms/:id/connect
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    validate_destination_id(&id)?;
    state.supervisor.start(&id).await?;
    state.platforms_cache.invalidate();
    Ok(Json(json!({ "id": id, "connected": true })))
}

/// POST /api/platforms/:id/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    validate_destination_id(&id)?;
    state.supervisor.stop(&id)?;
    state.platforms_cache.invalidate();
    Ok(Json(json!({ "id": id, "connected": false })))
}
