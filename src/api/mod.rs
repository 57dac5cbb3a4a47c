use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::middleware::admin_auth::admin_guard;
use crate::AppState;

pub mod handlers;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full HTTP surface. The admin guard runs on every request and
/// only acts on admin-prefixed paths, so it also covers unknown admin URLs.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/health", get(handlers::health))
        // Public
        .route("/api/analytics", post(handlers::log_analytics))
        // Admin
        .route("/api/admin/events", post(handlers::create_event))
        .route("/api/admin/events/:id/results", post(handlers::record_result))
        .fallback(fallback_404)
        .layer(middleware::from_fn_with_state(state.clone(), admin_guard))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(method_not_allowed_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

fn route_not_found() -> AppError {
    AppError::NotFound {
        code: "NOT_FOUND",
        message: "route not found".to_string(),
    }
}

async fn fallback_404() -> AppError {
    route_not_found()
}

/// A known path with the wrong method is reported like an unknown route.
async fn method_not_allowed_middleware(req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    if resp.status() == StatusCode::METHOD_NOT_ALLOWED {
        return route_not_found().into_response();
    }
    resp
}

/// Middleware: echo the caller's `x-request-id` or mint one, so clients can
/// correlate a response with the service logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Event and result payloads change on every admin write.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
