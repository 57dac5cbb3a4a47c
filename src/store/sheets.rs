//! Thin client over the Sheets v4 values surface.
//!
//! Every call resolves a bearer token through [`TokenProvider`] and runs
//! inside [`with_retry`], so 429/5xx responses are retried with backoff and
//! everything else is mapped straight onto [`ErrorCode`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::store::retry::{classify_status, is_retryable_status, parse_retry_after, with_retry, RetryConfig};
use crate::store::token::{AuthError, ServiceAccountCredentials, TokenProvider};

pub type Row = Vec<String>;

// ── Error Taxonomy ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotConfigured,
    ValidationError,
    AuthError,
    BadRequest,
    InvalidRange,
    NotFound,
    PermissionDenied,
    RateLimited,
    ServerError,
    RetryExhausted,
    NetworkError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotConfigured => "NOT_CONFIGURED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InvalidRange => "INVALID_RANGE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed row-store call. `message` is internal detail and must not be
/// forwarded to external callers verbatim.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct SheetsError {
    pub code: ErrorCode,
    pub status: Option<u16>,
    pub retryable: bool,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl SheetsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: None,
            retryable: matches!(code, ErrorCode::NetworkError),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn from_status(status: u16, message: &str, retry_after: Option<Duration>) -> Self {
        Self {
            code: classify_status(status, message),
            status: Some(status),
            retryable: is_retryable_status(status),
            message: message.to_string(),
            retry_after,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn not_configured(what: &str) -> Self {
        Self::new(ErrorCode::NotConfigured, format!("{} is not configured", what))
    }

    pub fn retry_exhausted(attempts: u32, last: &SheetsError) -> Self {
        Self {
            code: ErrorCode::RetryExhausted,
            status: last.status,
            retryable: false,
            message: format!("gave up after {} attempts; last error: {}", attempts, last),
            retry_after: None,
        }
    }
}

impl From<AuthError> for SheetsError {
    fn from(e: AuthError) -> Self {
        let status = match &e {
            AuthError::Exchange { status, .. } => *status,
            _ => None,
        };
        let code = match &e {
            AuthError::MissingIdentity | AuthError::MissingKey => ErrorCode::NotConfigured,
            _ => ErrorCode::AuthError,
        };
        Self {
            code,
            status,
            retryable: false,
            message: e.to_string(),
            retry_after: None,
        }
    }
}

/// The single logging path for row-store failures. The bearer token is
/// never part of the error, so it can't leak here.
pub fn log_client_error(op: &str, err: &SheetsError) {
    tracing::error!(
        op = op,
        code = %err.code,
        status = ?err.status,
        retryable = err.retryable,
        "sheets request failed: {}",
        err.message
    );
}

// ── Wire Types ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Row>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub updated_rows: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawValueRange {
    #[serde(default)]
    range: String,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchGet {
    #[serde(default)]
    value_ranges: Vec<RawValueRange>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUpdate {
    #[serde(default)]
    updated_rows: u32,
}

#[derive(Debug, Deserialize)]
struct RawAppend {
    #[serde(default)]
    updates: RawUpdate,
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<RawValueRange> for ValueRange {
    fn from(raw: RawValueRange) -> Self {
        Self {
            range: raw.range,
            values: raw
                .values
                .iter()
                .map(|row| row.iter().map(cell_to_string).collect())
                .collect(),
        }
    }
}

// ── RowStore ─────────────────────────────────────────────────

/// The four row operations the writers need, plus a health probe.
/// `row_index` is the 1-based data row; the header occupies sheet row 1, so
/// data row `n` lives at sheet row `n + 1`.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn get_values(&self, sheet: &str, range: &str) -> Result<Vec<Row>, SheetsError>;

    async fn batch_get(&self, ranges: &[String]) -> Result<Vec<ValueRange>, SheetsError>;

    async fn append(&self, sheet: &str, row: Vec<Value>) -> Result<WriteResult, SheetsError>;

    async fn update(&self, sheet: &str, row_index: usize, row: Vec<Value>) -> Result<WriteResult, SheetsError>;

    /// Never fails; problems are reported in the returned status.
    async fn health_check(&self) -> HealthStatus;
}

pub fn a1(sheet: &str, range: &str) -> String {
    format!("{}!{}", sheet, range)
}

pub fn validate_sheet(sheet: &str) -> Result<(), SheetsError> {
    if sheet.trim().is_empty() {
        return Err(SheetsError::validation("sheet name must not be empty"));
    }
    Ok(())
}

pub fn validate_row_index(row_index: usize) -> Result<(), SheetsError> {
    if row_index < 1 {
        return Err(SheetsError::validation(format!(
            "row index must be >= 1 (row 1 is the header), got {}",
            row_index
        )));
    }
    Ok(())
}

// ── Sheets Client ────────────────────────────────────────────

pub struct SheetsClient {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    credentials: ServiceAccountCredentials,
    tokens: TokenProvider,
    retry: RetryConfig,
}

impl SheetsClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        credentials: ServiceAccountCredentials,
        tokens: TokenProvider,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            credentials,
            tokens,
            retry,
        }
    }

    /// Build a client from configuration. Missing pieces are tolerated here
    /// and surface as `NOT_CONFIGURED` on the first call.
    pub fn from_config(cfg: &Config, tokens: TokenProvider) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let credentials = ServiceAccountCredentials::new(
            cfg.service_account_email.clone().unwrap_or_default(),
            cfg.private_key.clone().unwrap_or_default(),
            cfg.token_uri.clone(),
        );
        Ok(Self::new(
            http,
            cfg.sheets_api_base.clone(),
            cfg.spreadsheet_id.clone().unwrap_or_default(),
            credentials,
            tokens,
            cfg.retry.clone(),
        ))
    }

    fn spreadsheet_url(&self) -> Result<String, SheetsError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(SheetsError::not_configured("spreadsheet id"));
        }
        Ok(format!(
            "{}/spreadsheets/{}",
            self.base_url,
            urlencoding::encode(&self.spreadsheet_id)
        ))
    }

    /// One attempt: token, request, status mapping.
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<Bytes>,
    ) -> Result<Value, SheetsError> {
        let token = self.tokens.get_access_token(&self.credentials).await?;

        let mut req = self.http.request(method, url).bearer_auth(token).query(query);
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let resp = req.send().await.map_err(|e| {
            SheetsError::new(ErrorCode::NetworkError, format!("request failed: {}", e.without_url()))
        })?;

        let status = resp.status();
        if status.is_success() {
            let text = resp.text().await.map_err(|e| {
                SheetsError::new(ErrorCode::NetworkError, format!("failed to read body: {}", e.without_url()))
            })?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| SheetsError::new(ErrorCode::ServerError, format!("unreadable response body: {}", e)));
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = resp.text().await.unwrap_or_default();
        let message = upstream_message(&body, status);

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&self.credentials);
        }

        Err(SheetsError::from_status(status.as_u16(), &message, retry_after))
    }

    async fn send(
        &self,
        op: &str,
        method: Method,
        url: String,
        query: Vec<(&str, String)>,
        body: Option<Bytes>,
    ) -> Result<Value, SheetsError> {
        let result = with_retry(&self.retry, op, |_| {
            self.send_once(method.clone(), &url, &query, body.clone())
        })
        .await;
        if let Err(ref e) = result {
            log_client_error(op, e);
        }
        result
    }
}

/// Google error bodies are `{"error":{"code":400,"message":"...","status":"..."}}`.
fn upstream_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("upstream error").to_string())
}

fn encode_body(value: &Value) -> Result<Bytes, SheetsError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| SheetsError::validation(format!("row is not serializable: {}", e)))
}

#[async_trait]
impl RowStore for SheetsClient {
    async fn get_values(&self, sheet: &str, range: &str) -> Result<Vec<Row>, SheetsError> {
        validate_sheet(sheet)?;
        let url = format!(
            "{}/values/{}",
            self.spreadsheet_url()?,
            urlencoding::encode(&a1(sheet, range))
        );
        let value = self.send("getValues", Method::GET, url, vec![], None).await?;
        let raw: RawValueRange = serde_json::from_value(value)
            .map_err(|e| SheetsError::new(ErrorCode::ServerError, format!("unexpected values shape: {}", e)))?;
        Ok(ValueRange::from(raw).values)
    }

    async fn batch_get(&self, ranges: &[String]) -> Result<Vec<ValueRange>, SheetsError> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/values:batchGet", self.spreadsheet_url()?);
        let query = ranges.iter().map(|r| ("ranges", r.clone())).collect();
        let value = self.send("batchGet", Method::GET, url, query, None).await?;
        let raw: RawBatchGet = serde_json::from_value(value)
            .map_err(|e| SheetsError::new(ErrorCode::ServerError, format!("unexpected batchGet shape: {}", e)))?;
        Ok(raw.value_ranges.into_iter().map(ValueRange::from).collect())
    }

    async fn append(&self, sheet: &str, row: Vec<Value>) -> Result<WriteResult, SheetsError> {
        validate_sheet(sheet)?;
        let url = format!(
            "{}/values/{}:append",
            self.spreadsheet_url()?,
            urlencoding::encode(&a1(sheet, "A1"))
        );
        let body = encode_body(&serde_json::json!({ "values": [row] }))?;
        let query = vec![
            ("valueInputOption", "RAW".to_string()),
            ("insertDataOption", "INSERT_ROWS".to_string()),
        ];
        let value = self.send("append", Method::POST, url, query, Some(body)).await?;
        let raw: RawAppend = serde_json::from_value(value)
            .map_err(|e| SheetsError::new(ErrorCode::ServerError, format!("unexpected append shape: {}", e)))?;
        Ok(WriteResult {
            updated_rows: raw.updates.updated_rows,
        })
    }

    async fn update(&self, sheet: &str, row_index: usize, row: Vec<Value>) -> Result<WriteResult, SheetsError> {
        validate_sheet(sheet)?;
        validate_row_index(row_index)?;
        let range = a1(sheet, &format!("A{}", row_index + 1));
        let url = format!("{}/values/{}", self.spreadsheet_url()?, urlencoding::encode(&range));
        let body = encode_body(&serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [row],
        }))?;
        let query = vec![("valueInputOption", "RAW".to_string())];
        let value = self.send("update", Method::PUT, url, query, Some(body)).await?;
        let raw: RawUpdate = serde_json::from_value(value)
            .map_err(|e| SheetsError::new(ErrorCode::ServerError, format!("unexpected update shape: {}", e)))?;
        Ok(WriteResult {
            updated_rows: raw.updated_rows,
        })
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let result = match self.spreadsheet_url() {
            Ok(url) => {
                self.send_once(Method::GET, &url, &[("fields", "spreadsheetId".to_string())], None)
                    .await
            }
            Err(e) => Err(e),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthStatus {
                connected: true,
                latency_ms,
                error: None,
            },
            Err(e) => {
                log_client_error("healthCheck", &e);
                HealthStatus {
                    connected: false,
                    latency_ms,
                    error: Some(e.code.to_string()),
                }
            }
        }
    }
}

/// Shared handle used by the writers.
pub type SharedStore = Arc<dyn RowStore>;
