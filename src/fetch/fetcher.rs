use super::{
    FetchOutcome, FetchReport, FetchStats, Page, PageFailure, PageRequest, PageSource,
    RequestError, RetryPolicy,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Paging and concurrency bounds for one fetch.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub page_size: usize,
    /// Ceiling on simultaneous page requests.
    pub max_concurrent: usize,
    /// Safety bound on the number of pages requested.
    pub max_pages: usize,
    /// Deadline for the whole fetch.
    pub timeout: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_concurrent: 15,
            max_pages: 10_000,
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Result of driving one page to completion (success or final failure).
struct PageResult<R> {
    request: PageRequest,
    outcome: Result<Page<R>, PageFailure>,
    requests: u64,
    retries: u64,
    rate_limit_waits: u64,
}

/// Fetches every page of a [`PageSource`].
///
/// Page futures are multiplexed on the calling task. A single dispatcher
/// loop owns the record buffer and appends completed pages to it, so no
/// locking is needed besides the admission semaphore.
#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    limits: FetchLimits,
    retry: RetryPolicy,
}

impl PaginatedFetcher {
    pub fn new(limits: FetchLimits, retry: RetryPolicy) -> Self {
        Self { limits, retry }
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Retrieves all pages from `source` within the configured timeout.
    ///
    /// Pagination ends at the first short page, at a page that reports no
    /// more data, or at `max_pages`. A failed page never stops the fetch;
    /// it is recorded and the remaining pages are still requested.
    pub async fn fetch_all<S: PageSource>(&self, source: &S) -> FetchReport<S::Record> {
        self.fetch_all_until(source, Instant::now() + self.limits.timeout)
            .await
    }

    /// Like [`fetch_all`](Self::fetch_all), but bounded by an absolute
    /// deadline shared with other work instead of `limits.timeout`.
    pub async fn fetch_all_until<S: PageSource>(
        &self,
        source: &S,
        deadline: Instant,
    ) -> FetchReport<S::Record> {
        let started = Instant::now();
        let page_size = self.limits.page_size.max(1);
        let max_concurrent = self.limits.max_concurrent.max(1);
        let gate = Semaphore::new(max_concurrent);

        let mut in_flight = FuturesUnordered::new();
        let mut pending: BTreeSet<usize> = BTreeSet::new();
        let mut records: Vec<S::Record> = Vec::new();
        let mut failures: Vec<PageFailure> = Vec::new();
        let mut stats = FetchStats::default();

        let mut next_index = 0usize;
        let mut end: Option<usize> = None;
        let mut timed_out = false;

        info!(source = source.name(), page_size, max_concurrent, "Starting paginated fetch");

        loop {
            let limit = end.unwrap_or(self.limits.max_pages).min(self.limits.max_pages);
            while in_flight.len() < max_concurrent && next_index < limit {
                let request = PageRequest {
                    index: next_index,
                    offset: next_index * page_size,
                    limit: page_size,
                };
                pending.insert(next_index);
                in_flight.push(self.fetch_page(source, request, &gate));
                next_index += 1;
            }

            if in_flight.is_empty() {
                break;
            }

            let result = match timeout_at(deadline, in_flight.next()).await {
                Ok(Some(result)) => result,
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            };

            pending.remove(&result.request.index);
            stats.requests += result.requests;
            stats.retries += result.retries;
            stats.rate_limit_waits += result.rate_limit_waits;

            let index = result.request.index;
            if end.map_or(false, |e| index >= e) {
                debug!(source = source.name(), page = index, "Discarding page past end of data");
                continue;
            }

            match result.outcome {
                Ok(page) => {
                    stats.pages_succeeded += 1;

                    let short = page.records.len() < page_size;
                    if short || page.more == Some(false) {
                        let new_end = end.map_or(index + 1, |e| e.min(index + 1));
                        end = Some(new_end);
                        failures.retain(|f| f.index < new_end);
                    }

                    debug!(
                        source = source.name(),
                        page = index,
                        records = page.records.len(),
                        "Page fetched"
                    );
                    records.extend(page.records);
                }
                Err(failure) => {
                    warn!(
                        source = source.name(),
                        page = failure.index,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Page failed"
                    );
                    failures.push(failure);
                }
            }
        }

        // Dropping the futures cancels whatever is still in flight.
        drop(in_flight);

        if timed_out {
            warn!(
                source = source.name(),
                abandoned = pending.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetch deadline exceeded, abandoning in-flight pages"
            );
            for index in pending.into_iter().filter(|i| end.map_or(true, |e| *i < e)) {
                failures.push(PageFailure {
                    index,
                    offset: index * page_size,
                    attempts: 0,
                    error: "abandoned: fetch deadline exceeded".to_string(),
                });
            }
        }

        if end.is_none() && !timed_out && next_index >= self.limits.max_pages {
            warn!(
                source = source.name(),
                max_pages = self.limits.max_pages,
                "Page bound reached before the source signalled end of data"
            );
            stats.truncated = true;
        }

        failures.sort_by_key(|f| f.index);
        stats.pages_failed = failures.len();
        stats.records = records.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        let outcome = if stats.pages_succeeded == 0 && (!failures.is_empty() || timed_out) {
            let reason = match failures.last() {
                Some(f) => format!("no page could be fetched: {}", f.error),
                None => "no page could be fetched before the deadline".to_string(),
            };
            FetchOutcome::Failed {
                failures,
                timed_out,
                reason,
            }
        } else if failures.is_empty() && !timed_out {
            FetchOutcome::Complete { records }
        } else {
            FetchOutcome::Partial {
                records,
                failures,
                timed_out,
            }
        };

        info!(
            source = source.name(),
            records = stats.records,
            pages = stats.pages_succeeded,
            failed_pages = stats.pages_failed,
            requests = stats.requests,
            retries = stats.retries,
            rate_limit_waits = stats.rate_limit_waits,
            duration_ms = stats.duration_ms,
            complete = outcome.is_complete(),
            "Paginated fetch finished"
        );

        FetchReport { outcome, stats }
    }

    /// Drives one page through the retry loop.
    ///
    /// The admission permit is held only for the duration of a request, not
    /// while sleeping between attempts.
    async fn fetch_page<S: PageSource>(
        &self,
        source: &S,
        request: PageRequest,
        gate: &Semaphore,
    ) -> PageResult<S::Record> {
        let mut attempts = 0u32;
        let mut requests = 0u64;
        let mut retries = 0u64;
        let mut rate_limit_waits = 0u64;

        let failure = |attempts: u32, error: String| PageFailure {
            index: request.index,
            offset: request.offset,
            attempts,
            error,
        };

        let outcome = loop {
            let result = {
                let _permit = match gate.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => break Err(failure(attempts, "admission gate closed".to_string())),
                };
                requests += 1;
                source.fetch_page(request).await
            };

            match result {
                Ok(page) => break Ok(page),
                Err(RequestError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(self.retry.rate_limit_fallback);
                    rate_limit_waits += 1;
                    warn!(
                        source = source.name(),
                        page = request.index,
                        wait_secs = wait.as_secs_f64(),
                        "Rate limited, pausing before retry"
                    );
                    sleep(wait).await;
                }
                Err(err @ RequestError::Permanent(_)) => {
                    attempts += 1;
                    break Err(failure(attempts, err.to_string()));
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts.max(1) {
                        break Err(failure(attempts, err.to_string()));
                    }
                    let delay = self.retry.backoff(attempts);
                    debug!(
                        source = source.name(),
                        page = request.index,
                        attempt = attempts,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, backing off"
                    );
                    retries += 1;
                    sleep(delay).await;
                }
            }
        };

        PageResult {
            request,
            outcome,
            requests,
            retries,
            rate_limit_waits,
        }
    }
}
