use super::{ReconStatus, ReconciledRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Status counts grouped under one dimension value (environment, application, ...).
pub type StatusBreakdown = BTreeMap<String, BTreeMap<ReconStatus, usize>>;

const UNKNOWN: &str = "Unknown";

/// Counts and rates over a finished reconciliation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconSummary {
    pub total_records: usize,
    pub total_illumio_workloads: usize,
    pub total_cmdb_servers: usize,
    pub by_status: BTreeMap<ReconStatus, usize>,
    /// Records where both sides were present.
    pub matched_pairs: usize,
    /// Records flagged for review because of an unrecognized agent status.
    pub anomalies: usize,
    /// Keys held by more than one workload.
    pub duplicate_workload_keys: usize,
    /// Keys held by more than one CMDB server.
    pub duplicate_server_keys: usize,
    pub unmatched_workloads: usize,
    pub unmatched_servers: usize,
    /// Percentage of CMDB records with a VEN.
    pub coverage_rate: f64,
    /// Percentage of VEN records whose agent is active.
    pub active_rate: f64,
    /// Percentage of live VENs (active, offline, suspended) in full or
    /// selective enforcement.
    pub enforcement_rate: f64,
    pub by_environment: StatusBreakdown,
    pub by_application: StatusBreakdown,
    pub by_operating_entity: StatusBreakdown,
    pub by_ven_status: BTreeMap<String, usize>,
    pub by_enforcement_mode: BTreeMap<String, usize>,
    pub by_ven_version: BTreeMap<String, usize>,
}

impl ReconSummary {
    /// Builds the counts derivable from the records alone. Join-level
    /// counters (pairs, duplicates, unmatched) are filled in by the engine.
    pub(crate) fn from_records(
        records: &[ReconciledRecord],
        total_illumio_workloads: usize,
        total_cmdb_servers: usize,
    ) -> Self {
        let mut summary = ReconSummary {
            total_records: records.len(),
            total_illumio_workloads,
            total_cmdb_servers,
            ..Default::default()
        };
        for status in ReconStatus::ALL {
            summary.by_status.insert(status, 0);
        }

        let mut with_server = 0usize;
        let mut with_workload = 0usize;
        let mut live = 0usize;
        let mut enforced = 0usize;

        for record in records {
            *summary.by_status.entry(record.status).or_insert(0) += 1;
            if record.needs_review {
                summary.anomalies += 1;
            }

            tally(
                &mut summary.by_environment,
                dimension(record, "cmdb_environment", "illumio_label_env"),
                record.status,
            );
            tally(
                &mut summary.by_application,
                dimension(record, "cmdb_application", "illumio_label_app"),
                record.status,
            );
            tally(
                &mut summary.by_operating_entity,
                value_or_unknown(record.attribute("cmdb_operating_entity")),
                record.status,
            );

            if record.server.is_some() {
                with_server += 1;
            }

            if let Some(agent) = &record.agent_status {
                with_workload += 1;
                *summary.by_ven_status.entry(agent.to_string()).or_insert(0) += 1;

                let mode = value_or_unknown(record.attribute("illumio_enforcement_mode"));
                *summary.by_enforcement_mode.entry(mode.clone()).or_insert(0) += 1;
                let version = value_or_unknown(record.attribute("illumio_ven_version"));
                *summary.by_ven_version.entry(version).or_insert(0) += 1;

                if matches!(
                    record.status,
                    ReconStatus::DeployedActive
                        | ReconStatus::DeployedOffline
                        | ReconStatus::DeployedSuspended
                ) {
                    live += 1;
                    if mode == "full" || mode == "selective" {
                        enforced += 1;
                    }
                }
            }
        }

        let deployed_in_cmdb = records
            .iter()
            .filter(|r| r.server.is_some() && r.status.is_deployed())
            .count();

        summary.coverage_rate = percentage(deployed_in_cmdb, with_server);
        summary.active_rate = percentage(summary.count(ReconStatus::DeployedActive), with_workload);
        summary.enforcement_rate = percentage(enforced, live);
        summary
    }

    pub fn count(&self, status: ReconStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

fn dimension(record: &ReconciledRecord, primary: &str, fallback: &str) -> String {
    let value = record
        .attribute(primary)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| record.attribute(fallback).filter(|v| !v.trim().is_empty()));
    value_or_unknown(value)
}

fn value_or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn tally(breakdown: &mut StatusBreakdown, value: String, status: ReconStatus) {
    *breakdown.entry(value).or_default().entry(status).or_insert(0) += 1;
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let pct = part as f64 / whole as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}
