use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::sheets::{ErrorCode, SheetsError};

/// Failures reported across each writer's boundary.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed date '{0}', expected YYYY-MM-DD")]
    MalformedDate(String),

    #[error("unknown brand '{0}'")]
    UnknownBrand(String),

    #[error("invalid event id '{0}'")]
    InvalidId(String),

    #[error("event '{0}' not found")]
    NotFound(String),

    #[error("event '{0}' has no stored data")]
    MissingData(String),

    #[error("event '{id}' could not be parsed: {reason}")]
    Parse { id: String, reason: String },

    #[error("request must include at least one of schedule, standings, bracket")]
    NoUpdates,

    #[error("no unused event id after {attempts} attempts")]
    IdCollision { attempts: u32 },

    #[error("expected {expected} row(s) written, store reported {actual}")]
    UnexpectedRowCount { expected: u32, actual: u32 },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] SheetsError),
}

impl WriteError {
    /// Machine-readable code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            WriteError::MissingField(_) => "MISSING_FIELD",
            WriteError::InvalidField { .. } => "INVALID_INPUT",
            WriteError::MalformedDate(_) => "MALFORMED_DATE",
            WriteError::UnknownBrand(_) => "UNKNOWN_BRAND",
            WriteError::InvalidId(_) => "INVALID_ID",
            WriteError::NotFound(_) => "NOT_FOUND",
            WriteError::MissingData(_) => "MISSING_DATA",
            WriteError::Parse { .. } => "PARSE_ERROR",
            WriteError::NoUpdates => "NO_UPDATES",
            WriteError::IdCollision { .. } => "ID_COLLISION",
            WriteError::UnexpectedRowCount { .. } => "WRITE_MISMATCH",
            WriteError::Serialize(_) => "SERIALIZE_ERROR",
            WriteError::Store(e) => e.code.as_str(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WriteError::MissingField(_)
                | WriteError::InvalidField { .. }
                | WriteError::MalformedDate(_)
                | WriteError::UnknownBrand(_)
                | WriteError::InvalidId(_)
                | WriteError::NoUpdates
        )
    }
}

/// Errors at the HTTP boundary. Only 400/401/404/500/502/503 ever leave the
/// service, and upstream detail never appears in a response body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("unauthorized: {code}")]
    Unauthorized { code: &'static str },

    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String },

    #[error("not configured: {what}")]
    NotConfigured { what: &'static str },

    #[error("unavailable: {detail}")]
    Unavailable { code: &'static str, detail: String },

    #[error("upstream error: {detail}")]
    Upstream { code: &'static str, detail: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SheetsError> for AppError {
    fn from(e: SheetsError) -> Self {
        let detail = e.to_string();
        match e.code {
            ErrorCode::ValidationError => AppError::BadRequest {
                code: "VALIDATION_ERROR",
                message: e.message,
            },
            ErrorCode::NotFound => AppError::NotFound {
                code: "NOT_FOUND",
                message: "resource not found".to_string(),
            },
            ErrorCode::RateLimited | ErrorCode::RetryExhausted | ErrorCode::NetworkError => {
                AppError::Unavailable {
                    code: e.code.as_str(),
                    detail,
                }
            }
            ErrorCode::NotConfigured | ErrorCode::AuthError | ErrorCode::PermissionDenied => {
                AppError::Internal(anyhow::anyhow!(detail))
            }
            ErrorCode::BadRequest | ErrorCode::InvalidRange | ErrorCode::ServerError => AppError::Upstream {
                code: "UPSTREAM_ERROR",
                detail,
            },
        }
    }
}

impl From<WriteError> for AppError {
    fn from(e: WriteError) -> Self {
        if e.is_validation() {
            return AppError::BadRequest {
                code: e.code(),
                message: e.to_string(),
            };
        }
        match e {
            WriteError::NotFound(_) => AppError::NotFound {
                code: "NOT_FOUND",
                message: e.to_string(),
            },
            WriteError::Store(inner) => inner.into(),
            WriteError::UnexpectedRowCount { .. } => AppError::Upstream {
                code: "UPSTREAM_ERROR",
                detail: e.to_string(),
            },
            other => AppError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::NotConfigured { .. } | AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut correlation_id = None;

        let (code, msg) = match &self {
            AppError::BadRequest { code, message } => (*code, message.clone()),
            AppError::Unauthorized { code } => (*code, "authentication required".to_string()),
            AppError::NotFound { code, message } => (*code, message.clone()),
            AppError::NotConfigured { what } => {
                tracing::error!("{} is not configured", what);
                ("NOT_CONFIGURED", "service is not configured".to_string())
            }
            AppError::Unavailable { code, detail } => {
                tracing::warn!(code = *code, "upstream unavailable: {}", detail);
                (*code, "service temporarily unavailable, retry later".to_string())
            }
            AppError::Upstream { code, detail } => {
                let id = Uuid::new_v4().to_string();
                tracing::error!(correlation_id = %id, "Upstream error: {}", detail);
                correlation_id = Some(id);
                (*code, "upstream request failed".to_string())
            }
            AppError::Internal(e) => {
                let id = Uuid::new_v4().to_string();
                tracing::error!(correlation_id = %id, "Internal error: {}", e);
                correlation_id = Some(id);
                ("INTERNAL_ERROR", "internal server error".to_string())
            }
        };

        let mut error = json!({
            "code": code,
            "message": msg,
        });
        if let Some(id) = &correlation_id {
            error["correlationId"] = json!(id);
        }
        let body = Json(json!({ "success": false, "error": error }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Unauthorized { .. }) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"admin\""),
            );
        }

        response
    }
}
