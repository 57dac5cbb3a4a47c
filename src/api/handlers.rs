use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::analytics::AnalyticsInput;
use crate::writers::events::CreateEventInput;
use crate::writers::results::ResultUpdate;
use crate::AppState;

const MAX_ANALYTICS_BATCH: usize = 500;

// ── Request DTOs ─────────────────────────────────────────────

/// `/api/analytics` accepts one event object or `{ "events": [...] }`.
/// Batch items stay raw so one malformed item cannot sink the rest.
pub enum AnalyticsPayload {
    Batch(Vec<Value>),
    Single(AnalyticsInput),
}

impl AnalyticsPayload {
    pub fn from_value(mut value: Value) -> Result<Self, AppError> {
        if let Some(events) = value.get_mut("events").map(Value::take) {
            return match events {
                Value::Array(items) => Ok(AnalyticsPayload::Batch(items)),
                _ => Err(AppError::BadRequest {
                    code: "INVALID_BATCH",
                    message: "events must be an array".to_string(),
                }),
            };
        }
        serde_json::from_value(value)
            .map(AnalyticsPayload::Single)
            .map_err(|e| AppError::BadRequest {
                code: "INVALID_INPUT",
                message: format!("invalid analytics event: {}", e),
            })
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(|e| AppError::BadRequest {
        code: "INVALID_JSON",
        message: e.body_text(),
    })
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/admin/events — create an event, or return the existing duplicate
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateEventInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let input = body(payload)?;
    let result = state.events.create_event(input).await?;

    let status = if result.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "event": result.event,
            "duplicate": result.duplicate,
        })),
    ))
}

/// POST /api/admin/events/:id/results — merge schedule/standings/bracket
pub async fn record_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ResultUpdate>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let update = body(payload)?;
    let outcome = state.results.record_result(&id, update).await?;

    Ok(Json(json!({
        "success": true,
        "event": outcome.event,
        "updated": outcome.updated,
    })))
}

/// POST /api/analytics — append one or many analytics rows
pub async fn log_analytics(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    match AnalyticsPayload::from_value(body(payload)?)? {
        AnalyticsPayload::Single(input) => {
            state.analytics.log_event(input).await?;
            Ok(Json(json!({ "success": true, "count": 1 })))
        }
        AnalyticsPayload::Batch(events) => {
            if events.is_empty() || events.len() > MAX_ANALYTICS_BATCH {
                return Err(AppError::BadRequest {
                    code: "INVALID_BATCH",
                    message: format!("events must contain between 1 and {} items", MAX_ANALYTICS_BATCH),
                });
            }
            let outcome = state.analytics.log_values(events).await;
            let mut resp = json!({
                "success": outcome.success(),
                "count": outcome.count,
                "failed": outcome.failed,
            });
            if let Some(error) = outcome.error {
                resp["error"] = json!(error);
            }
            Ok(Json(resp))
        }
    }
}

/// GET /api/health — row store reachability. Never fails; 503 when disconnected.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let status = state.store.health_check().await;
    let code = if status.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "success": status.connected,
            "environment": state.config.environment,
            "store": status,
        })),
    )
}
