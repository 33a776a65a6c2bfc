//! HTTP surface of the relay
//!
//! Router construction and the request handlers. Handlers translate
//! [`RelayError`](crate::relay::RelayError) values into an HTTP status
//! plus a JSON `msg` body; 2xx paths relay the upstream payload verbatim.

use crate::health::HealthChecker;
use crate::metrics::RelayMetrics;
use crate::relay::RelayService;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub metrics: Arc<RelayMetrics>,
    pub health: Arc<HealthChecker>,
}

/// Build the axum router for the relay service
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/token/:user_name", get(token_handler))
        .route("/search", post(search_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Greeting handler
async fn hello_handler(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let status = StatusCode::OK;
    state
        .metrics
        .record_request("GET", "/", status.as_u16(), start.elapsed());
    (status, Json(json!({"msg": "Hello from TG Token Service"})))
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Metrics handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}

/// Token fetch handler - exchanges the user's credential record for a token
async fn token_handler(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
) -> Response {
    let start = Instant::now();
    info!("Received request to fetch token for:: {user_name}");

    let (status, body) = match state.relay.fetch_token(&user_name).await {
        Ok(payload) => (StatusCode::OK, payload),
        Err(err) => (err.status(), json!({"msg": err.to_string()})),
    };

    state
        .metrics
        .record_request("GET", "/token/{user_name}", status.as_u16(), start.elapsed());
    (status, Json(body)).into_response()
}

/// Search handler - forwards the raw body to the search upstream
async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let (status, payload) = match state.relay.forward_search(authorization, &body).await {
        Ok((status, payload)) => (status, payload),
        Err(err) => (err.status(), json!({"msg": err.to_string()})),
    };

    state
        .metrics
        .record_request("POST", "/search", status.as_u16(), start.elapsed());
    (status, Json(payload)).into_response()
}
