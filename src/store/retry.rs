use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::store::sheets::{ErrorCode, SheetsError};

// ── Retry Configuration ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter_ms: 0,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    10_000
}

// ── Status Classification ────────────────────────────────────

/// Whether a response status is worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Map a non-2xx status (and the upstream message) to the client error taxonomy.
pub fn classify_status(status: u16, message: &str) -> ErrorCode {
    match status {
        400 if message.to_ascii_lowercase().contains("range") => ErrorCode::InvalidRange,
        400 => ErrorCode::BadRequest,
        401 => ErrorCode::AuthError,
        403 => ErrorCode::PermissionDenied,
        404 => ErrorCode::NotFound,
        429 => ErrorCode::RateLimited,
        500..=599 => ErrorCode::ServerError,
        _ => ErrorCode::BadRequest,
    }
}

/// Longest server-requested wait honoured before retrying.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Parse a `Retry-After` header value given in delta-seconds.
/// HTTP-date values are not honoured and fall back to backoff.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ── Backoff ──────────────────────────────────────────────────

/// `initial_delay × multiplier^attempt`, capped at `max_delay`, plus jitter.
/// `attempt` is zero-based: the wait before the first retry uses attempt 0.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_delay_ms as f64;
    let max = config.max_delay_ms as f64;

    let raw_backoff = base * config.multiplier.powi(attempt as i32);
    let capped_backoff = raw_backoff.min(max);

    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };

    Duration::from_millis((capped_backoff as u64) + jitter)
}

/// Prefer the server-supplied interval, clamped to [`MAX_RETRY_AFTER`],
/// otherwise exponential backoff.
pub fn calculate_wait_time(
    config: &RetryConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    match retry_after {
        Some(wait) => wait.min(MAX_RETRY_AFTER),
        None => calculate_backoff(config, attempt),
    }
}

// ── Retry Loop ───────────────────────────────────────────────

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Exhaustion yields `RETRY_EXHAUSTED` carrying the
/// last upstream status.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T, SheetsError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SheetsError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = op_name, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.retryable => return Err(e),
            Err(e) => {
                if attempt >= config.max_retries {
                    debug!(
                        op = op_name,
                        "Exhausted {} retries; last error: {}", config.max_retries, e
                    );
                    return Err(SheetsError::retry_exhausted(attempt + 1, &e));
                }

                let wait_duration = calculate_wait_time(config, attempt, e.retry_after);
                warn!(
                    op = op_name,
                    code = %e.code,
                    status = ?e.status,
                    "Attempt {}/{} failed. Retrying in {:?}...",
                    attempt + 1,
                    config.max_retries + 1,
                    wait_duration
                );

                sleep(wait_duration).await;
                attempt += 1;
            }
        }
    }
}
