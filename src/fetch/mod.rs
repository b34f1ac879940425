//! Paginated retrieval of a full record set from one source.
//!
//! A [`PageSource`] knows how to request a single page. The
//! [`PaginatedFetcher`] drives it: bounded concurrency behind a semaphore,
//! retry with exponential backoff, rate-limit pauses, end-of-data detection
//! and an overall deadline. Per-page errors never escape the fetcher; they
//! are reported in the returned [`FetchOutcome`].

use async_trait::async_trait;
use serde::Serialize;

mod error;
mod fetcher;
mod retry;

pub use error::{parse_retry_after, RequestError};
pub use fetcher::{FetchLimits, PaginatedFetcher};
pub use retry::RetryPolicy;

/// Coordinates of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number
    pub index: usize,
    /// Record offset (`index * limit`)
    pub offset: usize,
    /// Requested page size
    pub limit: usize,
}

/// One page of records returned by a source.
#[derive(Debug, Clone)]
pub struct Page<R> {
    pub records: Vec<R>,
    /// Explicit "more pages" signal from the source, if it sends one.
    pub more: Option<bool>,
}

impl<R> Page<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records,
            more: None,
        }
    }

    /// Page whose end-of-data signal is derived from a total record count
    /// (e.g. an `X-Total-Count` header).
    pub fn with_total(records: Vec<R>, offset: usize, total: usize) -> Self {
        let more = offset + records.len() < total;
        Self {
            records,
            more: Some(more),
        }
    }
}

/// A source of paged records (one API collection).
#[async_trait]
pub trait PageSource: Send + Sync {
    type Record: Send;

    /// Short identifier used in logs (e.g. "illumio.workloads").
    fn name(&self) -> &str;

    /// Requests a single page. Called concurrently for different pages.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Self::Record>, RequestError>;
}

/// A page that could not be retrieved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub index: usize,
    pub offset: usize,
    /// Attempts made before giving up (0 when abandoned on timeout).
    pub attempts: u32,
    pub error: String,
}

/// Request counters for one fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchStats {
    pub requests: u64,
    pub retries: u64,
    pub rate_limit_waits: u64,
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    pub records: usize,
    pub duration_ms: u64,
    /// The page bound was reached before the source signalled its end.
    pub truncated: bool,
}

/// Result of fetching one source.
#[derive(Debug)]
pub enum FetchOutcome<R> {
    /// Every page up to the end of the data was retrieved.
    Complete { records: Vec<R> },
    /// Some pages failed or the deadline passed; `records` holds what arrived.
    Partial {
        records: Vec<R>,
        failures: Vec<PageFailure>,
        timed_out: bool,
    },
    /// Not a single page was retrieved.
    Failed {
        failures: Vec<PageFailure>,
        timed_out: bool,
        reason: String,
    },
}

impl<R> FetchOutcome<R> {
    pub fn records(&self) -> &[R] {
        match self {
            FetchOutcome::Complete { records } | FetchOutcome::Partial { records, .. } => records,
            FetchOutcome::Failed { .. } => &[],
        }
    }

    pub fn into_records(self) -> Vec<R> {
        match self {
            FetchOutcome::Complete { records } | FetchOutcome::Partial { records, .. } => records,
            FetchOutcome::Failed { .. } => Vec::new(),
        }
    }

    pub fn failures(&self) -> &[PageFailure] {
        match self {
            FetchOutcome::Complete { .. } => &[],
            FetchOutcome::Partial { failures, .. } | FetchOutcome::Failed { failures, .. } => {
                failures
            }
        }
    }

    pub fn timed_out(&self) -> bool {
        match self {
            FetchOutcome::Complete { .. } => false,
            FetchOutcome::Partial { timed_out, .. } | FetchOutcome::Failed { timed_out, .. } => {
                *timed_out
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FetchOutcome::Complete { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed { .. })
    }

    /// Converts the records, keeping failures and flags as they are.
    pub fn map_records<U, F>(self, f: F) -> FetchOutcome<U>
    where
        F: FnMut(R) -> U,
    {
        match self {
            FetchOutcome::Complete { records } => FetchOutcome::Complete {
                records: records.into_iter().map(f).collect(),
            },
            FetchOutcome::Partial {
                records,
                failures,
                timed_out,
            } => FetchOutcome::Partial {
                records: records.into_iter().map(f).collect(),
                failures,
                timed_out,
            },
            FetchOutcome::Failed {
                failures,
                timed_out,
                reason,
            } => FetchOutcome::Failed {
                failures,
                timed_out,
                reason,
            },
        }
    }
}

/// Outcome plus counters, as returned by [`PaginatedFetcher::fetch_all`].
#[derive(Debug)]
pub struct FetchReport<R> {
    pub outcome: FetchOutcome<R>,
    pub stats: FetchStats,
}

impl<R> FetchReport<R> {
    pub fn map_records<U, F>(self, f: F) -> FetchReport<U>
    where
        F: FnMut(R) -> U,
    {
        FetchReport {
            outcome: self.outcome.map_records(f),
            stats: self.stats,
        }
    }
}
