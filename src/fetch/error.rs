use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Failure of a single page request.
///
/// The fetcher decides what to do with each variant: transient errors are
/// retried with backoff, rate limits pause and retry without consuming an
/// attempt, permanent errors fail the page immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Network error, timeout or 5xx response.
    Transient(String),
    /// HTTP 429. `retry_after` comes from the `Retry-After` header when present.
    RateLimited { retry_after: Option<Duration> },
    /// 4xx other than 429, or a body that could not be parsed.
    Permanent(String),
}

impl RequestError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            429 => RequestError::RateLimited { retry_after },
            408 | 500..=599 => {
                RequestError::Transient(format!("server returned {}: {}", status, snippet))
            }
            401 | 403 => RequestError::Permanent(format!(
                "authentication failed ({}): {}",
                status, snippet
            )),
            _ => RequestError::Permanent(format!("request failed ({}): {}", status, snippet)),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RequestError::RateLimited { .. })
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transient(msg) => write!(f, "transient request error: {}", msg),
            RequestError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (retry after {}s)", d.as_secs()),
            RequestError::RateLimited { retry_after: None } => write!(f, "rate limited"),
            RequestError::Permanent(msg) => write!(f, "permanent request error: {}", msg),
        }
    }
}

impl std::error::Error for RequestError {}

/// Parses a `Retry-After` header value.
///
/// Accepts delay-seconds (`"120"`) and HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). A date in the past yields a zero
/// wait. Anything else yields `None`, which makes the fetcher fall back to
/// its configured wait.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
