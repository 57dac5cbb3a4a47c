//! Shared-secret guard for every state-mutating route.
//!
//! The credential is read from `Authorization: Bearer <secret>` first and the
//! legacy `?adminKey=` query parameter second. Neither the provided value nor
//! the configured secret is ever logged or echoed in a response.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use subtle::ConstantTimeEq;

use crate::config::SecretString;
use crate::errors::AppError;
use crate::AppState;

pub const LEGACY_QUERY_PARAM: &str = "adminKey";

static ADMIN_ROUTES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^/admin(?:/|$)",
        r"(?i)^/api/admin(?:/|$)",
        r"(?i)^/api/v\d+/admin(?:/|$)",
        r"(?i)^/[a-z0-9_-]+/admin(?:/|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// A non-bearer authorization header with no query credential to fall back on.
    #[error("unsupported authorization scheme")]
    Unauthorized,
    #[error("admin secret is not configured")]
    NotConfigured,
    #[error("credential does not match")]
    InvalidToken,
    #[error("no credential supplied")]
    MissingToken,
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::Unauthorized => "UNAUTHORIZED",
            GuardError::NotConfigured => "NOT_CONFIGURED",
            GuardError::InvalidToken => "INVALID_TOKEN",
            GuardError::MissingToken => "MISSING_TOKEN",
        }
    }
}

impl From<GuardError> for AppError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::NotConfigured => AppError::NotConfigured { what: "admin secret" },
            other => AppError::Unauthorized { code: other.code() },
        }
    }
}

/// Which credential source the request was authenticated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Bearer,
    QueryKey,
    /// No secret configured outside production.
    Unconfigured,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Bearer => "bearer",
            AuthMethod::QueryKey => "query",
            AuthMethod::Unconfigured => "none",
        }
    }
}

pub fn is_admin_route(path: &str) -> bool {
    ADMIN_ROUTES.iter().any(|re| re.is_match(path))
}

/// Length check, then a full-length comparison that never exits on the
/// first differing byte.
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

enum BearerHeader<'a> {
    Absent,
    Token(&'a str),
    OtherScheme,
}

fn bearer_from(headers: &HeaderMap) -> BearerHeader<'_> {
    let Some(raw) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return BearerHeader::Absent;
    };
    match raw.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            BearerHeader::Token(token.trim())
        }
        _ => BearerHeader::OtherScheme,
    }
}

fn query_key(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == LEGACY_QUERY_PARAM)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Authenticate one request against the configured admin secret.
pub fn check_admin_auth(
    headers: &HeaderMap,
    query: Option<&str>,
    path: &str,
    secret: Option<&SecretString>,
    is_production: bool,
) -> Result<AuthMethod, GuardError> {
    let bearer = bearer_from(headers);
    let query_key = query_key(query);
    let has_bearer = !matches!(bearer, BearerHeader::Absent);
    let has_query_key = query_key.is_some();

    let outcome = decide(&bearer, query_key.as_deref(), secret, is_production);

    let timestamp = Utc::now().to_rfc3339();
    match &outcome {
        Ok(AuthMethod::Unconfigured) => tracing::warn!(
            outcome = "allowed_unconfigured",
            method = AuthMethod::Unconfigured.as_str(),
            has_bearer,
            has_query_key,
            path,
            timestamp = %timestamp,
            "admin secret not set, allowing request outside production"
        ),
        Ok(method) => tracing::info!(
            outcome = "success",
            method = method.as_str(),
            has_bearer,
            has_query_key,
            path,
            timestamp = %timestamp,
            "admin auth"
        ),
        Err(e) => {
            let method = match (&bearer, has_query_key) {
                (BearerHeader::Token(_), _) => "bearer",
                (_, true) => "query",
                (BearerHeader::OtherScheme, false) => "bearer",
                (BearerHeader::Absent, false) => "none",
            };
            tracing::warn!(
                outcome = "failure",
                code = e.code(),
                method,
                has_bearer,
                has_query_key,
                path,
                timestamp = %timestamp,
                "admin auth rejected"
            )
        }
    }

    outcome
}

fn decide(
    bearer: &BearerHeader<'_>,
    query_key: Option<&str>,
    secret: Option<&SecretString>,
    is_production: bool,
) -> Result<AuthMethod, GuardError> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return if is_production {
            Err(GuardError::NotConfigured)
        } else {
            Ok(AuthMethod::Unconfigured)
        };
    };

    // A header in another scheme carries no bearer credential.
    let (provided, method) = match (bearer, query_key) {
        (BearerHeader::Token(token), _) => (*token, AuthMethod::Bearer),
        (_, Some(key)) => (key, AuthMethod::QueryKey),
        (BearerHeader::OtherScheme, None) => return Err(GuardError::Unauthorized),
        (BearerHeader::Absent, None) => return Err(GuardError::MissingToken),
    };

    if constant_time_eq(provided, secret.expose()) {
        Ok(method)
    } else {
        Err(GuardError::InvalidToken)
    }
}

/// Route detection plus auth in one pass. Non-admin paths always pass.
pub fn guard_admin_route(
    headers: &HeaderMap,
    query: Option<&str>,
    path: &str,
    secret: Option<&SecretString>,
    is_production: bool,
) -> Result<(), GuardError> {
    if !is_admin_route(path) {
        return Ok(());
    }
    check_admin_auth(headers, query, path, secret, is_production).map(|_| ())
}

/// axum middleware wrapping [`guard_admin_route`]; runs before any handler.
pub async fn admin_guard(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard_admin_route(
        req.headers(),
        req.uri().query(),
        req.uri().path(),
        state.config.admin_secret.as_ref(),
        state.config.environment.is_production(),
    )?;
    Ok(next.run(req).await)
}
