//! Outbound forwarding to the token and search upstreams
//!
//! This module owns the shared HTTP client and the configuration snapshot:
//! - Credential lookup by `auth_data.username`
//! - Token exchange against `TG_AUTH_API` (record forwarded verbatim)
//! - Search forwarding to `TG_SEARCH_API` (`Authorization` passed through)
//! - Error-to-status mapping consumed by the handlers

use crate::config::ConfigSnapshot;
use crate::metrics::RelayMetrics;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Per-request failures, surfaced to callers as an HTTP status plus a
/// JSON `msg` body. Nothing here ever reaches the caller as a fault.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The startup load never published a snapshot.
    #[error("TG_AUTH_DATA is not properly loaded")]
    Unconfigured,
    #[error("TG_AUTH_API is not properly loaded")]
    AuthApiUnconfigured,
    #[error("TG_SEARCH_API is not properly loaded")]
    SearchApiUnconfigured,
    #[error("Failed to find auth req data")]
    CredentialNotFound,
    /// The token upstream answered with a non-2xx status.
    #[error("Failed to get a valid token")]
    TokenRejected,
    #[error("Failed to get response from TG_AUTH_API")]
    AuthUnreachable,
    /// The token upstream answered 2xx with a non-JSON body.
    #[error("Json decode error while processing")]
    JsonDecode,
    #[error("Failed to search:: {0}")]
    SearchFailed(&'static str),
}

impl RelayError {
    /// HTTP status this error maps to at the handler boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::CredentialNotFound => StatusCode::BAD_REQUEST,
            RelayError::TokenRejected => StatusCode::FORBIDDEN,
            RelayError::Unconfigured
            | RelayError::AuthApiUnconfigured
            | RelayError::SearchApiUnconfigured
            | RelayError::AuthUnreachable
            | RelayError::JsonDecode
            | RelayError::SearchFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Relay service for forwarding requests to the two upstreams.
///
/// The snapshot is written once before the router is built and read-only
/// afterward, so no synchronization is needed around it.
pub struct RelayService {
    client: reqwest::Client,
    snapshot: Option<Arc<ConfigSnapshot>>,
    metrics: Arc<RelayMetrics>,
}

impl RelayService {
    pub fn new(
        client: reqwest::Client,
        snapshot: Option<Arc<ConfigSnapshot>>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            client,
            snapshot,
            metrics,
        }
    }

    /// Whether the startup load ever published a snapshot.
    pub fn is_configured(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Look up `user_name` in the credential table and exchange the record
    /// for a token at the auth upstream.
    ///
    /// On success the upstream's JSON body is returned verbatim.
    pub async fn fetch_token(&self, user_name: &str) -> Result<Value, RelayError> {
        let snapshot = self.snapshot.as_deref().ok_or_else(|| {
            error!("TG_AUTH_DATA is not properly loaded");
            RelayError::Unconfigured
        })?;
        let record = snapshot.find_credential(user_name).ok_or_else(|| {
            warn!("Failed to find auth req data for:: {user_name}");
            RelayError::CredentialNotFound
        })?;
        let auth_api = snapshot
            .auth_api
            .as_deref()
            .ok_or(RelayError::AuthApiUnconfigured)?;
        info!("Loaded token req data for:: {user_name}");

        // Compact serialization of the whole record; the upstream sees the
        // exact document the config carried.
        let body = record.to_string();

        info!("Sending request to fetch token");
        let mut request = self
            .client
            .post(auth_api)
            .header(CONTENT_LENGTH, body.len())
            .header(CONTENT_TYPE, "application/json");
        if let Some(archive_url) = snapshot.archive_url.as_deref() {
            request = request.header(ORIGIN, archive_url).header(REFERER, archive_url);
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_upstream("auth", "error");
                error!("Failed to get response from TG_AUTH_API: {err}");
                return Err(RelayError::AuthUnreachable);
            }
        };

        if !response.status().is_success() {
            self.metrics.record_upstream("auth", "rejected");
            let text = response.text().await.unwrap_or_default();
            error!("Received failure response:: {text}");
            return Err(RelayError::TokenRejected);
        }

        match response.json::<Value>().await {
            Ok(payload) => {
                self.metrics.record_upstream("auth", "ok");
                info!("Received response:: {payload}");
                Ok(payload)
            }
            Err(err) => {
                self.metrics.record_upstream("auth", "error");
                error!("Json decode error while processing: {err}");
                Err(RelayError::JsonDecode)
            }
        }
    }

    /// Forward a raw search body to the search upstream and relay its JSON
    /// response. Upstream 2xx maps to 200, anything else to 400 with the
    /// upstream body passed through either way.
    pub async fn forward_search(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<(StatusCode, Value), RelayError> {
        let snapshot = self.snapshot.as_deref().ok_or_else(|| {
            error!("TG_SEARCH_API is not properly loaded");
            RelayError::SearchApiUnconfigured
        })?;
        let search_api = snapshot.search_api.as_deref().ok_or_else(|| {
            error!("TG_SEARCH_API is not properly loaded");
            RelayError::SearchApiUnconfigured
        })?;

        // The search upstream expects the raw body wrapped in a JSON string
        // literal, so the payload goes out double-encoded.
        let payload = encode_search_body(body);

        let mut request = self
            .client
            .post(search_api)
            .header(CONTENT_LENGTH, payload.len())
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8");
        if let Some(archive_url) = snapshot.archive_url.as_deref() {
            request = request.header(ORIGIN, archive_url).header(REFERER, archive_url);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = match request.body(payload).send().await {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_upstream("search", "error");
                let kind = error_kind(&err);
                error!("Failed to search:: {kind}: {err}");
                return Err(RelayError::SearchFailed(kind));
            }
        };

        let upstream_status = response.status();
        match response.json::<Value>().await {
            Ok(payload) => {
                if upstream_status.is_success() {
                    self.metrics.record_upstream("search", "ok");
                    Ok((StatusCode::OK, payload))
                } else {
                    self.metrics.record_upstream("search", "rejected");
                    Ok((StatusCode::BAD_REQUEST, payload))
                }
            }
            Err(err) => {
                self.metrics.record_upstream("search", "error");
                let kind = error_kind(&err);
                error!("Failed to search:: {kind}: {err}");
                Err(RelayError::SearchFailed(kind))
            }
        }
    }
}

/// Wrap the raw inbound body in a JSON string literal for the search
/// upstream's wire format.
fn encode_search_body(body: &[u8]) -> String {
    Value::String(String::from_utf8_lossy(body).into_owned()).to_string()
}

/// Short classification of an outbound failure for the `msg` body.
fn error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "Timeout"
    } else if err.is_connect() {
        "ConnectionError"
    } else if err.is_decode() {
        "JsonDecodeError"
    } else if err.is_request() {
        "RequestError"
    } else {
        "Error"
    }
}
