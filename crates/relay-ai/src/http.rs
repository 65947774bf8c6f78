//! Shared POST-with-retry loop used by every cloud client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::time::sleep;

use crate::RelayAiError;

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Retry behavior for transient HTTP failures.
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Upper bound on total time spent including backoff; 0 disables the bound.
    pub retry_budget_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_budget_ms: 0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for `attempt`, jittered into [50%, 100%] when enabled,
    /// and never shorter than the server's `Retry-After`.
    pub fn delay_ms(&self, attempt: usize, retry_after_ms: Option<u64>) -> u64 {
        let base = BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT));
        let backoff = if self.jitter && base > 1 {
            let low = base / 2;
            let width = base - low;
            let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
            let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17);
            low + mixed % width.saturating_add(1)
        } else {
            base
        };
        retry_after_ms.map_or(backoff, |floor| backoff.max(floor))
    }

    pub fn budget_allows(&self, elapsed_ms: u64, delay_ms: u64) -> bool {
        self.retry_budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= self.retry_budget_ms
    }
}

pub(crate) fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub(crate) fn parse_retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub(crate) fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("relay-{}-{count}", relay_millis())
}

fn relay_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// POSTs `body` as JSON to `url`, retrying transient failures per `policy`, and
/// returns the raw success body. `decorate` adds per-request auth headers or query.
pub(crate) async fn post_json_with_retry<F>(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    policy: RetryPolicy,
    decorate: F,
) -> Result<String, RelayAiError>
where
    F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
{
    let started = Instant::now();
    for attempt in 0..=policy.max_retries {
        let request = client
            .post(url)
            .header("x-relay-request-id", new_request_id())
            .header("x-relay-retry-attempt", attempt.to_string())
            .json(body);
        let (retry_after_ms, failure) = match decorate(request).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.text().await?);
                }
                let retry_after_ms = parse_retry_after_ms(response.headers());
                let raw = response.text().await?;
                let failure = RelayAiError::HttpStatus {
                    status: status.as_u16(),
                    body: raw,
                };
                if !should_retry_status(status.as_u16()) {
                    return Err(failure);
                }
                (retry_after_ms, failure)
            }
            Err(error) => {
                if !is_retryable_transport_error(&error) {
                    return Err(RelayAiError::Http(error));
                }
                (None, RelayAiError::Http(error))
            }
        };

        if attempt == policy.max_retries {
            return Err(failure);
        }
        let delay_ms = policy.delay_ms(attempt, retry_after_ms);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if !policy.budget_allows(elapsed_ms, delay_ms) {
            return Err(failure);
        }
        tracing::debug!(url, attempt, delay_ms, error = %failure, "retrying provider request");
        sleep(Duration::from_millis(delay_ms)).await;
    }

    Err(RelayAiError::InvalidResponse(
        "request retry loop terminated unexpectedly".to_string(),
    ))
}
