//! Integration tests for the relay endpoints
//!
//! These tests drive the real router in-process and mock the two upstreams
//! with mockito, verifying the status mapping and the outbound wire format.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mockito::Matcher;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tg_token_relay::health::HealthChecker;
use tg_token_relay::metrics::RelayMetrics;
use tg_token_relay::relay::RelayService;
use tg_token_relay::{build_router, AppState, ConfigSnapshot};
use tower::ServiceExt;

fn app_state(snapshot: Option<ConfigSnapshot>) -> AppState {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let metrics = Arc::new(RelayMetrics::new());
    AppState {
        relay: Arc::new(RelayService::new(
            client,
            snapshot.map(Arc::new),
            metrics.clone(),
        )),
        metrics,
        health: Arc::new(HealthChecker::new()),
    }
}

fn alice_snapshot(auth_api: Option<String>, search_api: Option<String>) -> ConfigSnapshot {
    ConfigSnapshot {
        credentials: vec![json!({"auth_data": {"username": "alice"}, "api_id": 11})],
        auth_api,
        search_api,
        archive_url: Some("https://archive.example".to_string()),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn greeting_returns_fixed_message() {
    let app = build_router(app_state(None));
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Hello from TG Token Service"})
    );
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = build_router(app_state(None));
    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn metrics_reports_request_counts() {
    let state = app_state(None);
    let app = build_router(state);

    app.clone().oneshot(get("/")).await.unwrap();
    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let output = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(output.contains("relay_requests_total"));
}

#[tokio::test]
async fn token_fetch_without_config_returns_500() {
    let app = build_router(app_state(None));
    let response = app.oneshot(get("/token/anyone")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "TG_AUTH_DATA is not properly loaded"})
    );
}

#[tokio::test]
async fn token_fetch_unknown_user_returns_400() {
    let snapshot = alice_snapshot(Some("https://auth.example/token".to_string()), None);
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/bob")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Failed to find auth req data"})
    );
}

#[tokio::test]
async fn token_fetch_on_loaded_but_empty_table_returns_400() {
    // Loaded-but-empty is a lookup miss, distinct from the never-loaded 500.
    let snapshot = ConfigSnapshot {
        credentials: vec![],
        auth_api: Some("https://auth.example/token".to_string()),
        search_api: None,
        archive_url: None,
    };
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/anyone")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Failed to find auth req data"})
    );
}

#[tokio::test]
async fn token_fetch_forwards_record_and_relays_token() {
    let mut server = mockito::Server::new_async().await;
    let expected_body = json!({"auth_data": {"username": "alice"}, "api_id": 11}).to_string();
    let mock = server
        .mock("POST", "/auth")
        .match_header("content-type", "application/json")
        .match_header("origin", "https://archive.example")
        .match_header("referer", "https://archive.example")
        .match_body(Matcher::Exact(expected_body))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token":"tok-123","expires_in":3600}"#)
        .create_async()
        .await;

    let snapshot = alice_snapshot(Some(format!("{}/auth", server.url())), None);
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"token": "tok-123", "expires_in": 3600})
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn token_fetch_maps_upstream_rejection_to_403() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth")
        .with_status(401)
        .with_body(r#"{"error":"bad credentials"}"#)
        .create_async()
        .await;

    let snapshot = alice_snapshot(Some(format!("{}/auth", server.url())), None);
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // The upstream body must not leak through on rejection.
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Failed to get a valid token"})
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn token_fetch_maps_unreachable_upstream_to_500() {
    let snapshot = alice_snapshot(Some("http://127.0.0.1:9/auth".to_string()), None);
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Failed to get response from TG_AUTH_API"})
    );
}

#[tokio::test]
async fn token_fetch_maps_malformed_upstream_to_500() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth")
        .with_status(200)
        .with_body("not json at all")
        .create_async()
        .await;

    let snapshot = alice_snapshot(Some(format!("{}/auth", server.url())), None);
    let app = build_router(app_state(Some(snapshot)));
    let response = app.oneshot(get("/token/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "Json decode error while processing"})
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn repeated_token_fetches_are_not_coalesced() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth")
        .with_status(200)
        .with_body(r#"{"token":"tok-123"}"#)
        .expect(2)
        .create_async()
        .await;

    let snapshot = alice_snapshot(Some(format!("{}/auth", server.url())), None);
    let app = build_router(app_state(Some(snapshot)));

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/token/alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn search_relays_upstream_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/search")
        .match_header("content-type", "text/plain;charset=UTF-8")
        .match_header("authorization", "Bearer caller-token")
        .match_header("origin", "https://archive.example")
        // The inbound body goes out re-encoded as a JSON string literal.
        .match_body(Matcher::Exact("\"hello\"".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"hits":[{"id":1}]}"#)
        .create_async()
        .await;

    let snapshot = alice_snapshot(None, Some(format!("{}/search", server.url())));
    let app = build_router(app_state(Some(snapshot)));
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .header("authorization", "Bearer caller-token")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"hits": [{"id": 1}]}));
    mock.assert_async().await;
}

#[tokio::test]
async fn search_relays_upstream_failure_as_400_with_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/search")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(r#"{"msg":"index down"}"#)
        .create_async()
        .await;

    let snapshot = alice_snapshot(None, Some(format!("{}/search", server.url())));
    let app = build_router(app_state(Some(snapshot)));
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // Upstream non-2xx maps to 400, body passed through unchanged.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"msg": "index down"}));
    mock.assert_async().await;
}

#[tokio::test]
async fn search_without_config_returns_500() {
    let app = build_router(app_state(None));
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"msg": "TG_SEARCH_API is not properly loaded"})
    );
}

#[tokio::test]
async fn search_with_unreachable_upstream_returns_500() {
    let snapshot = alice_snapshot(None, Some("http://127.0.0.1:9/search".to_string()));
    let app = build_router(app_state(Some(snapshot)));
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    let msg = body["msg"].as_str().unwrap();
    assert!(
        msg.starts_with("Failed to search:: "),
        "unexpected msg: {msg}"
    );
}
