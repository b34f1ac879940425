//! Run orchestration: fetch both sources concurrently, apply the
//! degradation policy, reconcile.
//!
//! | Illumio                  | ServiceNow               | Result                           |
//! |--------------------------|--------------------------|----------------------------------|
//! | failed (or probe failed) | any                      | [`RunOutcome::Aborted`]          |
//! | complete / partial       | failed (or probe failed) | Illumio-only report with caveat  |
//! | complete / partial       | complete / partial       | full reconciliation              |

use crate::Connector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use ven_monitor::fetch::{FetchOutcome, FetchReport, FetchStats};
use ven_monitor::inventory::{RawCmdbServer, RawWorkload};
use ven_monitor::reconcile::{reconcile, reconcile_illumio_only, Reconciliation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    IllumioOnly,
}

/// Something the consumer of a report must know about its completeness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Caveat {
    /// CMDB could not be read; no gap or shadow-IT statuses were produced.
    CmdbUnavailable { reason: String },
    /// A source returned only part of its records.
    Incomplete {
        source: String,
        failed_pages: usize,
        timed_out: bool,
    },
    /// A source hit the page bound before signalling end of data.
    Truncated { source: String },
}

/// Why one source produced no usable data.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFailure {
    Probe(String),
    Fetch(String),
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFailure::Probe(reason) => write!(f, "connection test failed: {}", reason),
            SourceFailure::Fetch(reason) => write!(f, "fetch failed: {}", reason),
        }
    }
}

impl std::error::Error for SourceFailure {}

/// Records retrieved from one source plus its fetch counters.
struct SourceData<R> {
    records: Vec<R>,
    stats: FetchStats,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: RunMode,
    pub caveats: Vec<Caveat>,
    pub illumio_stats: FetchStats,
    pub servicenow_stats: Option<FetchStats>,
    pub reconciliation: Reconciliation,
}

impl RunReport {
    pub fn is_degraded(&self) -> bool {
        !self.caveats.is_empty()
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    Aborted { run_id: Uuid, reason: String },
}

/// Probe then fetch one source, returning its records with any caveats for
/// partial or truncated data.
async fn collect<C: Connector>(
    connector: &C,
) -> Result<(SourceData<C::Record>, Vec<Caveat>), SourceFailure> {
    let source = connector.name().to_string();

    connector
        .test_connection()
        .await
        .map_err(|e| SourceFailure::Probe(format!("{:#}", e)))?;
    info!(source = %source, "Connection test passed");

    let FetchReport { outcome, stats } = connector
        .fetch()
        .await
        .map_err(|e| SourceFailure::Fetch(format!("{:#}", e)))?;

    let mut caveats = Vec::new();
    if stats.truncated {
        warn!(source = %source, "Source data truncated at the page bound");
        caveats.push(Caveat::Truncated {
            source: source.clone(),
        });
    }

    let records = match outcome {
        FetchOutcome::Complete { records } => records,
        FetchOutcome::Partial {
            records,
            failures,
            timed_out,
        } => {
            warn!(
                source = %source,
                records = records.len(),
                failed_pages = failures.len(),
                timed_out,
                "Source data is incomplete"
            );
            caveats.push(Caveat::Incomplete {
                source: source.clone(),
                failed_pages: failures.len(),
                timed_out,
            });
            records
        }
        FetchOutcome::Failed { reason, .. } => return Err(SourceFailure::Fetch(reason)),
    };

    Ok((SourceData { records, stats }, caveats))
}

/// Runs one reconciliation.
///
/// Both sources are collected concurrently. A CMDB failure degrades the run
/// to an Illumio-only report; an Illumio failure aborts it.
pub async fn run<I, S>(illumio: &I, servicenow: &S) -> RunOutcome
where
    I: Connector<Record = RawWorkload>,
    S: Connector<Record = RawCmdbServer>,
{
    let run_id = Uuid::now_v7();
    let started_at = Utc::now();
    info!(run_id = %run_id, "Starting reconciliation run");

    let (illumio_result, servicenow_result) = tokio::join!(collect(illumio), collect(servicenow));

    let (workloads, mut caveats) = match illumio_result {
        Ok(collected) => collected,
        Err(failure) => {
            error!(run_id = %run_id, error = %failure, "Illumio source unavailable, aborting run");
            return RunOutcome::Aborted {
                run_id,
                reason: format!("Illumio {}", failure),
            };
        }
    };

    let (mode, reconciliation, servicenow_stats) = match servicenow_result {
        Ok((servers, servicenow_caveats)) => {
            caveats.extend(servicenow_caveats);
            let reconciliation = reconcile(&workloads.records, &servers.records);
            (RunMode::Full, reconciliation, Some(servers.stats))
        }
        Err(failure) => {
            warn!(
                run_id = %run_id,
                error = %failure,
                "ServiceNow source unavailable, falling back to Illumio-only report"
            );
            caveats.push(Caveat::CmdbUnavailable {
                reason: failure.to_string(),
            });
            (
                RunMode::IllumioOnly,
                reconcile_illumio_only(&workloads.records),
                None,
            )
        }
    };

    let report = RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        mode,
        caveats,
        illumio_stats: workloads.stats,
        servicenow_stats,
        reconciliation,
    };

    info!(
        run_id = %run_id,
        mode = ?report.mode,
        records = report.reconciliation.records.len(),
        caveats = report.caveats.len(),
        "Reconciliation run finished"
    );

    RunOutcome::Completed(Box::new(report))
}
