//! Control-plane handler tests driven through the router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use recast_api::{create_router, AppState, TelemetryHub};
use recast_core::config::{Config, RtmpServerConfig};
use recast_core::models::{Destination, MASKED_KEY};
use recast_core::ConfigStore;
use recast_ingest::{IngestServer, IngestService, MediaBus};
use recast_relay::RelaySupervisor;

fn sample_config() -> Config {
    let mut config = Config::default();
    config.stream_manager.rtmp_server.stream_key = "ingest-secret".into();
    config.stream_manager.platforms = vec![
        Destination {
            id: "a".into(),
            name: "twitch".into(),
            url: "rtmp://live.twitch.tv/app".into(),
            stream_key: "sk_twitch".into(),
            enabled: true,
            ..Destination::default()
        },
        Destination {
            id: "b".into(),
            name: "youtube".into(),
            url: "rtmp://a.rtmp.youtube.com/live2".into(),
            stream_key: "sk_youtube".into(),
            enabled: true,
            ..Destination::default()
        },
    ];
    config
}

async fn test_state(dir: &std::path::Path) -> AppState {
    let store = Arc::new(ConfigStore::new(dir.join("config.yaml")));
    let config = sample_config();
    store.save(&config).await.expect("save config");

    let ingest_config = RtmpServerConfig {
        // Never bound in these tests.
        host: "127.0.0.1".into(),
        ..config.stream_manager.rtmp_server.clone()
    };
    let service = Arc::new(IngestService::new(ingest_config));
    let ingest_server = Arc::new(IngestServer::new(service, Arc::new(MediaBus::new())));

    let supervisor = Arc::new(RelaySupervisor::new(ingest_server.service()));
    supervisor.configure(config.stream_manager.platforms.clone());

    let hub = Arc::new(TelemetryHub::new(
        Arc::clone(&supervisor),
        ingest_server.service(),
    ));
    AppState::new(store, supervisor, ingest_server, hub)
}

fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("body"))
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).expect("request");
    // The rate limiter keys on the peer address.
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_answers_ok() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("GET", "/health", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].as_i64().is_some());
}

#[tokio::test]
async fn platforms_list_masks_stream_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("GET", "/api/platforms", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let list = json.as_array().expect("array");
    assert_eq!(list.len(), 2);
    for platform in list {
        assert_eq!(platform["stream_key"], MASKED_KEY);
    }
}

#[tokio::test]
async fn platform_id_validation_rejects_junk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("POST", "/api/platforms/not%20ok/connect", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_platform_is_404() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("POST", "/api/platforms/ghost/connect", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["error"].as_str().expect("error").contains("ghost"));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("POST", "/api/platforms/a/disconnect", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn config_is_masked_unless_keys_requested() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_state(dir.path()).await;

    let response = create_router(state.clone())
        .oneshot(request("GET", "/api/config", None))
        .await
        .expect("response");
    let masked = body_json(response).await;
    assert_eq!(
        masked["stream_manager"]["rtmp_server"]["stream_key"],
        MASKED_KEY
    );
    assert_eq!(
        masked["stream_manager"]["platforms"][0]["stream_key"],
        MASKED_KEY
    );

    let response = create_router(state)
        .oneshot(request("GET", "/api/config?includeKeys=true", None))
        .await
        .expect("response");
    let full = body_json(response).await;
    assert_eq!(
        full["stream_manager"]["platforms"][0]["stream_key"],
        "sk_twitch"
    );
}

#[tokio::test]
async fn config_update_rejects_schema_violations_with_field_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let mut bad = serde_json::to_value(sample_config()).expect("config json");
    bad["ui"]["port"] = serde_json::json!(0);

    let response = router
        .oneshot(request("POST", "/api/config", Some(bad)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    let details = json["details"].as_array().expect("field list");
    assert!(details.iter().any(|f| f["field"] == "ui.port"));
}

#[tokio::test]
async fn config_update_persists_and_refreshes_platforms() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_state(dir.path()).await;
    let router = create_router(state.clone());

    let mut updated = sample_config();
    updated.stream_manager.platforms.push(Destination {
        id: "c".into(),
        name: "kick".into(),
        url: "rtmps://ingest.kick.com".into(),
        stream_key: "sk_kick".into(),
        enabled: true,
        ..Destination::default()
    });

    let response = router
        .clone()
        .oneshot(request(
            "POST",
            "/api/config",
            Some(serde_json::to_value(&updated).expect("json")),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["saved"], true);
    // Same ingest tuple: no listener restart.
    assert_eq!(json["ingestRestarted"], false);

    // The supervisor sees the new destination immediately.
    assert_eq!(state.supervisor.destinations().len(), 3);

    // And the platform list serves it after the cache is gone.
    let response = router
        .oneshot(request("GET", "/api/platforms", None))
        .await
        .expect("response");
    let list = body_json(response).await;
    assert_eq!(list.as_array().expect("array").len(), 3);
}

#[tokio::test]
async fn api_responses_carry_rate_limit_headers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = create_router(test_state(dir.path()).await);

    let response = router
        .oneshot(request("GET", "/api/platforms", None))
        .await
        .expect("response");
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
}
