pub mod reddit;
pub mod twitter;

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::error::FetchError;

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Delay a rate-limited source asked for, if it said anything usable.
///
/// Understands `retry-after` (seconds), Twitter's `x-rate-limit-reset`
/// (epoch seconds) and Reddit's `x-ratelimit-reset` (seconds until reset).
pub(crate) fn rate_limit_hint(headers: &HeaderMap, now_epoch: u64) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    if let Some(reset) = header_str(headers, "x-rate-limit-reset").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(reset.saturating_sub(now_epoch)));
    }
    header_str(headers, "x-ratelimit-reset")
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

/// Map a non-success HTTP status to the fetch error taxonomy.
pub(crate) fn status_error(source: &str, status: StatusCode, headers: &HeaderMap) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        return FetchError::RateLimited {
            retry_after: rate_limit_hint(headers, now),
        };
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return FetchError::Transient(format!("{source} returned {status}"));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return FetchError::Unavailable(format!("{source} rejected credentials ({status})"));
    }
    FetchError::Unavailable(format!("{source} returned unexpected status {status}"))
}
