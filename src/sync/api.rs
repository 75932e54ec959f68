//! Sync API Client - HTTP submission of queued batches
//!
//! One endpoint per record type, same contract for all of them:
//! - Request: `POST <base>/<endpoint>` with
//!   `{<pluralKey>: [payload..], operatorId, operatorName}`
//! - Success: 2xx and a JSON body without a top-level error field
//! - Anything else fails the whole batch for that type, regardless of the
//!   per-item `detalhes` the server may have returned

use super::models::{OperatorIdentity, RecordType};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Remote Sink Contract
// ============================================================================

/// Destination of per-type batches. Submitting has no local side effects.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn submit(
        &self,
        record_type: RecordType,
        payloads: &[Value],
        operator: &OperatorIdentity,
    ) -> Result<SubmitReceipt, SyncApiError>;
}

// ============================================================================
// API Client
// ============================================================================

/// Connection settings for the sync endpoints
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    /// Sent as `apikey` and bearer token when present
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, SyncApiError> {
        Ok(Self {
            base_url: normalize_base(base_url)?,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Base URLs are joined with relative endpoint paths, so they need a
/// trailing slash to keep their last segment.
fn normalize_base(base_url: &str) -> Result<Url, SyncApiError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// API client for the yard's sync endpoints
pub struct SyncApiClient {
    client: Client,
    config: ApiConfig,
}

impl SyncApiClient {
    /// Create new API client
    pub fn new(config: ApiConfig) -> Result<Self, SyncApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn endpoint_url(&self, record_type: RecordType) -> Result<Url, SyncApiError> {
        Ok(self.config.base_url.join(record_type.endpoint())?)
    }

    /// Submit one type's payloads to its endpoint
    pub async fn submit_batch(
        &self,
        record_type: RecordType,
        payloads: &[Value],
        operator: &OperatorIdentity,
    ) -> Result<SubmitReceipt, SyncApiError> {
        let url = self.endpoint_url(record_type)?;
        let body = build_body(record_type, payloads, operator);

        log::debug!(
            "POST {} ({} {} records)",
            url,
            payloads.len(),
            record_type
        );

        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await?;
        handle_response(response).await
    }
}

#[async_trait]
impl RemoteSink for SyncApiClient {
    async fn submit(
        &self,
        record_type: RecordType,
        payloads: &[Value],
        operator: &OperatorIdentity,
    ) -> Result<SubmitReceipt, SyncApiError> {
        self.submit_batch(record_type, payloads, operator).await
    }
}

/// Build `{<pluralKey>: payloads, operatorId, operatorName}`
pub fn build_body(record_type: RecordType, payloads: &[Value], operator: &OperatorIdentity) -> Value {
    let mut body = Map::new();
    body.insert(record_type.body_key().to_string(), Value::Array(payloads.to_vec()));
    body.insert("operatorId".to_string(), Value::String(operator.id.clone()));
    body.insert("operatorName".to_string(), Value::String(operator.name.clone()));
    Value::Object(body)
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body returned by a sync endpoint on success
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub sucesso: Option<bool>,
    #[serde(default)]
    pub sincronizados: Option<usize>,
    #[serde(default)]
    pub erros: Option<usize>,
    #[serde(default)]
    pub detalhes: Vec<ItemDetail>,
}

/// Per-record result reported by the endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemDetail {
    #[serde(default)]
    pub id: Value,
    /// `inserido`, `sincronizado` or `erro`
    pub status: String,
    #[serde(default)]
    pub erro: Option<String>,
}

impl ItemDetail {
    pub fn is_error(&self) -> bool {
        self.status == "erro"
    }
}

/// What the caller learns from an accepted batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitReceipt {
    pub synced: usize,
    pub item_errors: usize,
    pub details: Vec<ItemDetail>,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Endpoint reported an error: {0}")]
    Remote(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

/// Interpret an endpoint response
async fn handle_response(response: reqwest::Response) -> Result<SubmitReceipt, SyncApiError> {
    let status = response.status();

    if !status.is_success() {
        return Err(handle_error(response).await);
    }

    let text = response
        .text()
        .await
        .map_err(|e| SyncApiError::InvalidResponse(e.to_string()))?;
    parse_success_body(&text)
}

/// Decide whether a 2xx body really reports success
pub fn parse_success_body(text: &str) -> Result<SubmitReceipt, SyncApiError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SyncApiError::InvalidResponse(e.to_string()))?;

    if let Some(message) = top_level_error(&value) {
        return Err(SyncApiError::Remote(message));
    }

    let parsed: SyncResponse = match value {
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| SyncApiError::InvalidResponse(e.to_string()))?,
        _ => SyncResponse::default(),
    };

    if parsed.sucesso == Some(false) {
        return Err(SyncApiError::Remote("sucesso=false".to_string()));
    }

    let item_errors = parsed
        .erros
        .unwrap_or_else(|| parsed.detalhes.iter().filter(|d| d.is_error()).count());

    for detail in parsed.detalhes.iter().filter(|d| d.is_error()) {
        log::warn!(
            "Record {} rejected remotely: {}",
            detail.id,
            detail.erro.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(SubmitReceipt {
        synced: parsed.sincronizados.unwrap_or(0),
        item_errors,
        details: parsed.detalhes,
    })
}

fn top_level_error(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    ["error", "erro"].iter().find_map(|key| match object.get(*key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(other) => Some(other.to_string()),
    })
}

/// Convert error response to SyncApiError
async fn handle_error(response: reqwest::Response) -> SyncApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .as_ref()
        .and_then(top_level_error)
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncApiError::Unauthorized,
        s if s.is_server_error() => SyncApiError::ServerError(format!("{}: {}", s, message)),
        s => SyncApiError::HttpStatus {
            status: s.as_u16(),
            message,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
