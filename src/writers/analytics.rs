//! Append-only analytics rows. There is deliberately no update or delete path.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Environment;
use crate::errors::WriteError;
use crate::middleware::sanitize::sanitize_row;
use crate::models::analytics::{
    truncate_chars, AnalyticsEvent, AnalyticsInput, Metric, Source, Surface, ANALYTICS_SHEET, MAX_USER_AGENT_CHARS,
};
use crate::store::sheets::SharedStore;

const MAX_FIELD_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub count: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, WriteError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(WriteError::MissingField(field))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| truncate_chars(s.trim(), MAX_FIELD_CHARS))
        .filter(|s| !s.is_empty())
}

#[derive(Clone)]
pub struct AnalyticsWriter {
    store: SharedStore,
    env: Environment,
    source: Source,
}

impl AnalyticsWriter {
    pub fn new(store: SharedStore, env: Environment) -> Self {
        Self {
            store,
            env,
            source: Source::Worker,
        }
    }

    /// Validate an inbound payload into a row-ready event.
    pub fn build_event(&self, input: AnalyticsInput) -> Result<AnalyticsEvent, WriteError> {
        let event_id = required(&input.event_id, "eventId")?;
        let surface = required(&input.surface, "surface")?
            .parse::<Surface>()
            .map_err(|reason| WriteError::InvalidField { field: "surface", reason })?;
        let metric = required(&input.metric, "metric")?
            .parse::<Metric>()
            .map_err(|reason| WriteError::InvalidField { field: "metric", reason })?;

        let value = input.value.unwrap_or(1.0);
        if !value.is_finite() {
            return Err(WriteError::InvalidField {
                field: "value",
                reason: "must be a finite number".to_string(),
            });
        }

        Ok(AnalyticsEvent {
            timestamp: Utc::now(),
            event_id: truncate_chars(&event_id, MAX_FIELD_CHARS),
            surface,
            metric,
            sponsor_id: optional(input.sponsor_id),
            value,
            token: optional(input.token),
            user_agent: truncate_chars(input.user_agent.as_deref().unwrap_or_default(), MAX_USER_AGENT_CHARS),
            session_id: optional(input.session_id),
            visible_sponsor_ids: input
                .visible_sponsor_ids
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            source: self.source,
            env: self.env,
        })
    }

    /// The fixed 12-column row, every string cell sanitized.
    pub fn to_row(event: &AnalyticsEvent) -> Vec<Value> {
        let row = vec![
            json!(event.timestamp.to_rfc3339()),
            json!(event.event_id),
            json!(event.surface.as_str()),
            json!(event.metric.as_str()),
            json!(event.sponsor_id.clone().unwrap_or_default()),
            json!(event.value),
            json!(event.token.clone().unwrap_or_default()),
            json!(event.user_agent),
            json!(event.session_id.clone().unwrap_or_default()),
            json!(event.visible_sponsor_ids.join(",")),
            json!(event.source.as_str()),
            json!(event.env.as_str()),
        ];
        sanitize_row(row)
    }

    pub async fn log_event(&self, input: AnalyticsInput) -> Result<AnalyticsEvent, WriteError> {
        let event = self.build_event(input)?;
        let result = self.store.append(ANALYTICS_SHEET, Self::to_row(&event)).await?;
        if result.updated_rows != 1 {
            return Err(WriteError::UnexpectedRowCount {
                expected: 1,
                actual: result.updated_rows,
            });
        }
        tracing::debug!(
            event_id = %event.event_id,
            surface = %event.surface,
            metric = %event.metric,
            "analytics row appended"
        );
        Ok(event)
    }

    /// Log each input in order. A failure is recorded and the batch carries on.
    pub async fn log_events(&self, inputs: Vec<AnalyticsInput>) -> BatchOutcome {
        self.log_each(inputs.into_iter().map(Ok)).await
    }

    /// Like [`Self::log_events`] for raw JSON items; an item that does not
    /// decode is a per-item `INVALID_INPUT` failure.
    pub async fn log_values(&self, items: Vec<Value>) -> BatchOutcome {
        self.log_each(items.into_iter().map(|item| {
            serde_json::from_value::<AnalyticsInput>(item).map_err(|e| WriteError::InvalidField {
                field: "event",
                reason: e.to_string(),
            })
        }))
        .await
    }

    async fn log_each(&self, inputs: impl Iterator<Item = Result<AnalyticsInput, WriteError>>) -> BatchOutcome {
        let mut count = 0;
        let mut errors = Vec::new();

        for (i, input) in inputs.enumerate() {
            let logged = match input {
                Ok(input) => self.log_event(input).await,
                Err(e) => Err(e),
            };
            match logged {
                Ok(_) => count += 1,
                Err(e) if e.is_validation() => errors.push(format!("[{}] {}: {}", i, e.code(), e)),
                // Store failures may carry upstream text; report the code only.
                Err(e) => {
                    tracing::warn!(index = i, code = e.code(), "analytics append failed: {}", e);
                    errors.push(format!("[{}] {}", i, e.code()));
                }
            }
        }

        if !errors.is_empty() {
            tracing::warn!(logged = count, failed = errors.len(), "analytics batch had failures");
        }
        BatchOutcome {
            count,
            failed: errors.len(),
            error: if errors.is_empty() { None } else { Some(errors.join("; ")) },
        }
    }

    /// Record an admin-side result update with value 1.
    pub async fn log_result_update(&self, event_id: &str, metric: Metric) -> Result<(), WriteError> {
        self.log_event(AnalyticsInput {
            event_id: Some(event_id.to_string()),
            surface: Some(Surface::Admin.as_str().to_string()),
            metric: Some(metric.as_str().to_string()),
            value: Some(1.0),
            ..AnalyticsInput::default()
        })
        .await
        .map(|_| ())
    }

    /// Fire-and-forget variant of [`Self::log_result_update`]: runs on its own
    /// task, failures are logged and never reach the caller.
    pub fn log_result_update_async(&self, event_id: String, metric: Metric) {
        let writer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.log_result_update(&event_id, metric).await {
                tracing::error!(event_id = %event_id, metric = %metric, "failed to log result update: {}", e);
            }
        });
    }
}
