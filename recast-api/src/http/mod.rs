// Module: http
// HTTP/JSON REST control plane plus the WebSocket telemetry endpoint.

pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod platforms;
pub mod stream;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::compression::predicate::SizeAbove;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use recast_core::ConfigStore;
use recast_ingest::{IngestServer, IngestService};
use recast_relay::RelaySupervisor;

pub use error::{AppError, AppResult};
pub use middleware::RateLimiter;
pub use platforms::PlatformsCache;

use crate::ws;
use crate::ws::TelemetryHub;

/// Response bodies below this size are sent uncompressed.
const COMPRESSION_MIN_BYTES: u16 = 1024;

/// Hard timeout on any control-plane request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub supervisor: Arc<RelaySupervisor>,
    pub ingest: Arc<IngestService>,
    pub ingest_server: Arc<IngestServer>,
    pub hub: Arc<TelemetryHub>,
    pub rate_limiter: RateLimiter,
    pub platforms_cache: Arc<PlatformsCache>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<ConfigStore>,
        supervisor: Arc<RelaySupervisor>,
        ingest_server: Arc<IngestServer>,
        hub: Arc<TelemetryHub>,
    ) -> Self {
        Self {
            store,
            supervisor,
            ingest: ingest_server.service(),
            ingest_server,
            hub,
            rate_limiter: RateLimiter::default(),
            platforms_cache: PlatformsCache::new(),
        }
    }
}

/// Build the control-plane router: `/health`, `/ws`, and the rate-limited
/// `/api` surface, wrapped in the global layers (tracing, gzip for bodies
/// over 1 KiB at the default level (6), CORS, request timeout).
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/stream/status", get(stream::status))
        .route("/stream/start", post(stream::start_all))
        .route("/stream/stop", post(stream::stop_all))
        .route("/stream/connect", post(stream::connect_ingest))
        .route("/stream/disconnect", post(stream::disconnect_ingest))
        .route("/platforms", get(platforms::list))
        .route("/platforms/{id}/connect", post(platforms::connect))
        .route("/platforms/{id}/disconnect", post(platforms::disconnect))
        .route("/config", get(config::get_config).post(config::update_config))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new().compress_when(SizeAbove::new(COMPRESSION_MIN_BYTES)),
        )
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
