//! Retry and backoff utilities for provider HTTP calls.
//!
//! This module classifies HTTP failures into retryable and final errors and
//! computes the deterministic exponential backoff used between attempts.

use std::time::Duration;

use super::ProviderError;

/// Default number of attempts per segment.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (2 seconds).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Maximum delay cap for exponential backoff (30 seconds).
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// HTTP status code for rate limiting.
const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Determine if a reqwest error is a transient network error that should be retried.
///
/// Returns true for connection errors, timeouts, and other temporary failures.
pub fn is_transient_network_error(error: &reqwest::Error) -> bool {
    if error.is_connect() || error.is_timeout() || error.is_body() {
        return true;
    }

    // 502 Bad Gateway, 503 Service Unavailable, 504 Gateway Timeout
    if let Some(status) = error.status() {
        return is_transient_status(status.as_u16());
    }

    false
}

/// Status codes that indicate a temporary server-side issue.
pub fn is_transient_status(status: u16) -> bool {
    status == HTTP_STATUS_TOO_MANY_REQUESTS || (500..=599).contains(&status)
}

/// Parse the Retry-After header value to get retry delay in seconds.
pub fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Turn a non-success HTTP response into a [`ProviderError`].
///
/// 429 and 5xx are transient; every other status is a remote refusal.
pub async fn error_for_response(response: reqwest::Response, context: &str) -> ProviderError {
    let status = response.status();
    let retry_after_secs = parse_retry_after(&response);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if is_transient_status(status.as_u16()) {
        if status.as_u16() == HTTP_STATUS_TOO_MANY_REQUESTS {
            log::warn!(
                "{}: rate limited, Retry-After: {:?} seconds",
                context,
                retry_after_secs
            );
        }
        return ProviderError::Transient {
            message: format!("{} failed with status {}: {}", context, status, body),
            retry_after_secs,
        };
    }

    ProviderError::Rejected {
        reason: format!("{} failed with status {}: {}", context, status, body),
    }
}

/// Calculate exponential backoff delay.
///
/// Uses the formula: min(base * 2^attempt + jitter, max_delay) where the
/// jitter is a fixed half of the base, capped at 500ms, so delays are
/// reproducible.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = (base.as_millis() as u64).min(1000);
    let jitter = Duration::from_millis(jitter_ms / 2);
    exponential.saturating_add(jitter).min(max)
}

/// Backoff for a failed attempt, honouring a server-provided Retry-After.
pub fn backoff_for(error: &ProviderError, attempt: u32, base: Duration, max: Duration) -> Duration {
    let computed = calculate_backoff(attempt, base, max);
    match error {
        ProviderError::Transient {
            retry_after_secs: Some(secs),
            ..
        } => Duration::from_secs(*secs).min(max).max(computed),
        _ => computed,
    }
}
