//! Configuration loader for the relay service
//!
//! The configuration is not a local file: it is an env-file style document
//! fetched over HTTP once at startup. The document carries the credential
//! list as a single-line JSON array plus the upstream URLs. Loading is
//! all-or-nothing; any failure leaves the service unconfigured.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable naming the remote config document URL.
pub const CONFIG_FILE_URL: &str = "CONFIG_FILE_URL";

/// Document key holding the JSON credential list.
pub const TG_AUTH_DATA: &str = "TG_AUTH_DATA";
/// Document key holding the token-issuing upstream URL.
pub const TG_AUTH_API: &str = "TG_AUTH_API";
/// Document key holding the search upstream URL.
pub const TG_SEARCH_API: &str = "TG_SEARCH_API";
/// Document key holding the `Origin`/`Referer` value for outbound calls.
pub const TG_ARCHIVE_URL: &str = "TG_ARCHIVE_URL";

/// Errors from the one-shot configuration load.
///
/// All of these are caught in `main`, logged, and converted to "start
/// unconfigured"; none of them crash the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONFIG_FILE_URL not provided")]
    MissingUrl,
    #[error("Failed to download config file:: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("Failed to download config file:: [{0}]")]
    Status(reqwest::StatusCode),
    #[error("Error occurred while decoding config file response")]
    Decode,
    #[error("Failed to read {0}")]
    MissingKey(&'static str),
    #[error("Error occurred while parsing config data: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable configuration snapshot published once at startup.
///
/// Credential records are opaque JSON documents; only `auth_data.username`
/// is ever inspected, the rest is forwarded verbatim to the token upstream.
/// The upstream URLs are `Option` so an absent key in the document stays
/// distinguishable from an empty string.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub credentials: Vec<Value>,
    pub auth_api: Option<String>,
    pub search_api: Option<String>,
    pub archive_url: Option<String>,
}

impl ConfigSnapshot {
    /// Find the first credential record whose `auth_data.username` equals
    /// `user_name` (case-sensitive, first match wins).
    pub fn find_credential(&self, user_name: &str) -> Option<&Value> {
        self.credentials
            .iter()
            .find(|record| record_username(record) == Some(user_name))
    }
}

fn record_username(record: &Value) -> Option<&str> {
    record.pointer("/auth_data/username").and_then(Value::as_str)
}

/// Fetch the remote config document and parse it into a snapshot.
pub async fn load_remote_config(
    config_url: Option<&str>,
    client: &reqwest::Client,
) -> Result<ConfigSnapshot, ConfigError> {
    let url = config_url.ok_or(ConfigError::MissingUrl)?;

    info!("Downloading config file");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ConfigError::Status(response.status()));
    }

    info!("Loading config file data");
    let body = response.bytes().await?;
    let document = std::str::from_utf8(&body).map_err(|_| ConfigError::Decode)?;

    parse_snapshot(document)
}

/// Parse an env-file style document into a snapshot.
///
/// `TG_AUTH_DATA` is required; the URL keys are optional and their absence
/// is carried into the snapshot. Returns the snapshot whole or not at all,
/// never a partial one.
pub fn parse_snapshot(document: &str) -> Result<ConfigSnapshot, ConfigError> {
    let values = parse_env_document(document);

    info!("Parsing config data");
    let raw_credentials = values
        .get(TG_AUTH_DATA)
        .ok_or(ConfigError::MissingKey(TG_AUTH_DATA))?;
    let credentials: Vec<Value> = serde_json::from_str(raw_credentials)?;

    for record in &credentials {
        match record_username(record) {
            Some(username) => info!("Loaded token data for:: {username}"),
            None => warn!("Credential record without auth_data.username"),
        }
    }

    Ok(ConfigSnapshot {
        credentials,
        auth_api: values.get(TG_AUTH_API).cloned(),
        search_api: values.get(TG_SEARCH_API).cloned(),
        archive_url: values.get(TG_ARCHIVE_URL).cloned(),
    })
}

/// Parse `KEY=VALUE` lines into a map; later assignments override earlier
/// ones. Blank lines, `#` comments, and lines without an assignment are
/// skipped. A value wrapped in one pair of matching quotes is unwrapped;
/// quotes anywhere else are kept verbatim, since the credential list is
/// raw JSON on a single line.
fn parse_env_document(document: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in document.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            warn!("Skipping config line without assignment: {line}");
            continue;
        };
        values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    values
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
