use anyhow::{anyhow, Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use ven_monitor::fetch::{
    parse_retry_after, FetchLimits, FetchOutcome, PageSource, PaginatedFetcher, RequestError,
    RetryPolicy,
};

/// Header carrying the total record count, when the API sends it.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

/// Builds the HTTP client shared by all page requests of one connector.
pub fn build_client(timeout: Duration, verify_tls: bool) -> Result<Client> {
    Client::builder()
        .user_agent("ven-monitor/0.1")
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .context("Failed to build HTTP client")
}

/// Maps a transport-level failure (no HTTP status) to a request error.
pub fn transport_error(err: reqwest::Error) -> RequestError {
    if err.is_decode() {
        RequestError::Permanent(format!("malformed response body: {}", err))
    } else if err.is_builder() {
        RequestError::Permanent(format!("invalid request: {}", err))
    } else {
        RequestError::Transient(err.to_string())
    }
}

/// Passes successful responses through and classifies the rest.
///
/// 429 becomes `RateLimited` with the `Retry-After` value in seconds when
/// the header is present.
pub async fn check_response(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Request returned non-success status");
    Err(RequestError::from_status(status.as_u16(), retry_after, &body))
}

/// Reads `X-Total-Count` from a response.
pub fn total_count(response: &Response) -> Option<usize> {
    response
        .headers()
        .get(TOTAL_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Time budget of one connector run, shared by the connection check and
/// every fetch that follows it.
#[derive(Debug)]
pub struct RunDeadline {
    budget: Duration,
    open: Mutex<Option<Instant>>,
}

impl RunDeadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            open: Mutex::new(None),
        }
    }

    /// Opens a new window ending `budget` from now.
    pub fn start(&self) -> Instant {
        let deadline = Instant::now() + self.budget;
        *self.window() = Some(deadline);
        deadline
    }

    /// Closes the open window and returns its end, or a fresh deadline if
    /// no window was open.
    pub fn finish(&self) -> Instant {
        self.window()
            .take()
            .unwrap_or_else(|| Instant::now() + self.budget)
    }

    fn window(&self) -> MutexGuard<'_, Option<Instant>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Requests a single one-record page through the regular retry path,
/// giving up at `deadline`.
///
/// An empty collection still counts as reachable.
pub async fn check_connection<S: PageSource>(
    source: &S,
    retry: &RetryPolicy,
    deadline: Instant,
) -> Result<()> {
    let fetcher = PaginatedFetcher::new(
        FetchLimits {
            page_size: 1,
            max_concurrent: 1,
            max_pages: 1,
            timeout: deadline.saturating_duration_since(Instant::now()),
        },
        retry.clone(),
    );
    let report = fetcher.fetch_all_until(source, deadline).await;
    match report.outcome {
        FetchOutcome::Failed { reason, .. } => Err(anyhow!("{}", reason)),
        FetchOutcome::Partial { failures, .. } => Err(anyhow!(
            "connection check did not complete: {}",
            failures
                .first()
                .map_or("unknown error", |f| f.error.as_str())
        )),
        FetchOutcome::Complete { .. } => Ok(()),
    }
}
