//! Classification of provider failures and the retry backoff schedule.
//!
//! The provider reports failures through HTTP status codes and an error
//! message body; both feed [`ErrorKind`], which decides whether a request is
//! worth retrying.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    RateLimit,
    Server,
    Network,
    Auth,
    Validation,
    Unknown,
}

impl ErrorKind {
    /// Transient kinds worth another attempt after a backoff.
    pub(crate) fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Server | ErrorKind::Network)
    }
}

/// Classify an HTTP status returned by the provider.
pub(crate) fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        // 529 is the provider's "overloaded" status
        500..=599 => ErrorKind::Server,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a free-form error message (provider error body, transport error).
pub(crate) fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota exceeded")
        || lower.contains("429")
    {
        return ErrorKind::RateLimit;
    }

    if lower.contains("internal server error")
        || lower.contains("api_error")
        || lower.contains("service unavailable")
        || lower.contains("overloaded")
    {
        return ErrorKind::Server;
    }
    // Bare status codes need word boundaries so "5000ms" is not a 500
    {
        lazy_static::lazy_static! {
            static ref HTTP_5XX: regex::Regex =
                regex::Regex::new(r"(?i)\b(?:50[0234]|529)\b").unwrap();
        }
        if HTTP_5XX.is_match(&lower) {
            return ErrorKind::Server;
        }
    }

    if lower.contains("network error")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("dns error")
        || lower.contains("econnrefused")
        || lower.contains("etimedout")
    {
        return ErrorKind::Network;
    }

    if lower.contains("unauthorized")
        || lower.contains("authentication_error")
        || lower.contains("authentication failed")
        || lower.contains("invalid x-api-key")
        || lower.contains("invalid api key")
        || lower.contains("permission_error")
    {
        return ErrorKind::Auth;
    }

    if lower.contains("invalid_request_error")
        || lower.contains("invalid request")
        || lower.contains("validation error")
    {
        return ErrorKind::Validation;
    }

    ErrorKind::Unknown
}

/// Delay before retry `retry_count` (0-based), in milliseconds.
///
/// `min(base * multiplier^retry + jitter, max)` where jitter is ±5% of the
/// capped delay.
pub(crate) fn calculate_backoff_delay(
    retry_count: u32,
    base_delay_ms: f64,
    max_delay_ms: f64,
    backoff_multiplier: f64,
) -> f64 {
    // Cap before jitter so huge exponents never produce inf/NaN
    let delay = (base_delay_ms * backoff_multiplier.powi(retry_count as i32)).min(max_delay_ms);
    let jitter = delay * 0.1 * (rand::random::<f64>() - 0.5);
    (delay + jitter).min(max_delay_ms)
}
