use super::{MatchType, ReconStatus, ReconSummary, ReconciledRecord, Reconciliation};
use crate::inventory::{AgentStatus, RawCmdbServer, RawWorkload};
use crate::normalize::NormalizedKey;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Classifies one pairing.
///
/// `agent` is the workload's agent status when a workload is present.
/// Returns the status and whether the record needs manual review, or `None`
/// when neither side is present.
pub fn classify(agent: Option<&AgentStatus>, in_cmdb: bool) -> Option<(ReconStatus, bool)> {
    match (agent, in_cmdb) {
        (Some(status), true) => Some(match status {
            AgentStatus::Active => (ReconStatus::DeployedActive, false),
            AgentStatus::Offline => (ReconStatus::DeployedOffline, false),
            AgentStatus::Suspended => (ReconStatus::DeployedSuspended, false),
            AgentStatus::Uninstalled | AgentStatus::Unmanaged => {
                (ReconStatus::DeployedUninstalled, false)
            }
            AgentStatus::Unknown(_) => (ReconStatus::DeployedOffline, true),
        }),
        (None, true) => Some((ReconStatus::NotDeployed, false)),
        (Some(status), false) => Some((
            ReconStatus::NotInCmdb,
            matches!(status, AgentStatus::Unknown(_)),
        )),
        (None, false) => None,
    }
}

#[derive(Default)]
struct Group<'a> {
    workloads: Vec<&'a RawWorkload>,
    servers: Vec<&'a RawCmdbServer>,
}

/// Full outer join of workloads and CMDB servers on the normalized hostname.
///
/// Every input record appears in at least one output record. Keys shared
/// by several records on both sides produce one record per pairing.
pub fn reconcile(workloads: &[RawWorkload], servers: &[RawCmdbServer]) -> Reconciliation {
    info!(
        workloads = workloads.len(),
        servers = servers.len(),
        "Reconciling VEN workloads against CMDB"
    );

    let mut groups: BTreeMap<NormalizedKey, Group<'_>> = BTreeMap::new();
    let mut records = Vec::with_capacity(workloads.len().max(servers.len()));
    let mut unmatched_workloads = 0;
    let mut unmatched_servers = 0;

    for workload in workloads {
        match workload.key() {
            NormalizedKey::Unmatched => {
                debug!(href = %workload.href, "Workload has no usable hostname");
                unmatched_workloads += 1;
                records.push(pair(NormalizedKey::Unmatched, Some(workload), None));
            }
            key => groups.entry(key).or_default().workloads.push(workload),
        }
    }
    for server in servers {
        match server.key() {
            NormalizedKey::Unmatched => {
                debug!(sys_id = %server.sys_id, "CMDB server has no usable hostname");
                unmatched_servers += 1;
                records.push(pair(NormalizedKey::Unmatched, None, Some(server)));
            }
            key => groups.entry(key).or_default().servers.push(server),
        }
    }

    let mut matched_pairs = 0;
    let mut duplicate_workload_keys = 0;
    let mut duplicate_server_keys = 0;

    for (key, group) in groups {
        if group.workloads.len() > 1 {
            duplicate_workload_keys += 1;
        }
        if group.servers.len() > 1 {
            duplicate_server_keys += 1;
        }
        if group.workloads.len() > 1 || group.servers.len() > 1 {
            debug!(
                key = %key,
                workloads = group.workloads.len(),
                servers = group.servers.len(),
                "Duplicate hostname, emitting one record per pairing"
            );
        }

        match (group.workloads.is_empty(), group.servers.is_empty()) {
            (false, false) => {
                for &workload in &group.workloads {
                    for &server in &group.servers {
                        matched_pairs += 1;
                        records.push(pair(key.clone(), Some(workload), Some(server)));
                    }
                }
            }
            (false, true) => {
                for &workload in &group.workloads {
                    records.push(pair(key.clone(), Some(workload), None));
                }
            }
            (true, false) => {
                for &server in &group.servers {
                    records.push(pair(key.clone(), None, Some(server)));
                }
            }
            (true, true) => {}
        }
    }

    sort_records(&mut records);

    let mut summary = ReconSummary::from_records(&records, workloads.len(), servers.len());
    summary.matched_pairs = matched_pairs;
    summary.duplicate_workload_keys = duplicate_workload_keys;
    summary.duplicate_server_keys = duplicate_server_keys;
    summary.unmatched_workloads = unmatched_workloads;
    summary.unmatched_servers = unmatched_servers;

    info!(
        records = records.len(),
        matched_pairs,
        not_deployed = summary.count(ReconStatus::NotDeployed),
        not_in_cmdb = summary.count(ReconStatus::NotInCmdb),
        anomalies = summary.anomalies,
        coverage_rate = summary.coverage_rate,
        "Reconciliation complete"
    );

    Reconciliation { records, summary }
}

/// Classifies workloads on their own, for runs where CMDB data is missing.
///
/// Every workload is treated as if it had a CMDB entry, so only the
/// `deployed_*` statuses are produced.
pub fn reconcile_illumio_only(workloads: &[RawWorkload]) -> Reconciliation {
    info!(workloads = workloads.len(), "Classifying VEN workloads without CMDB data");

    let mut records: Vec<ReconciledRecord> = workloads
        .iter()
        .map(|workload| {
            let key = workload.key();
            let (status, _) = classify(Some(&workload.agent_status), true)
                .unwrap_or((ReconStatus::DeployedOffline, true));
            if matches!(workload.agent_status, AgentStatus::Unknown(_)) {
                warn_anomaly(&key, workload);
            }
            ReconciledRecord::build(key, Some(workload), None, status, MatchType::IllumioOnly)
        })
        .collect();

    sort_records(&mut records);

    let mut summary = ReconSummary::from_records(&records, workloads.len(), 0);
    summary.unmatched_workloads = records.iter().filter(|r| r.key.is_unmatched()).count();

    info!(
        records = records.len(),
        active = summary.count(ReconStatus::DeployedActive),
        offline = summary.count(ReconStatus::DeployedOffline),
        anomalies = summary.anomalies,
        "Illumio-only classification complete"
    );

    Reconciliation { records, summary }
}

fn pair(
    key: NormalizedKey,
    workload: Option<&RawWorkload>,
    server: Option<&RawCmdbServer>,
) -> ReconciledRecord {
    let agent = workload.map(|w| &w.agent_status);
    // At least one side is always present here.
    let (status, needs_review) =
        classify(agent, server.is_some()).unwrap_or((ReconStatus::NotInCmdb, false));
    if needs_review {
        if let Some(w) = workload {
            warn_anomaly(&key, w);
        }
    }
    let match_type = if workload.is_some() && server.is_some() {
        MatchType::Hostname
    } else {
        MatchType::NoMatch
    };
    ReconciledRecord::build(key, workload, server, status, match_type)
}

fn warn_anomaly(key: &NormalizedKey, workload: &RawWorkload) {
    warn!(
        key = %key,
        href = %workload.href,
        agent_status = %workload.agent_status,
        "Unrecognized agent status, flagged for review"
    );
}

fn sort_records(records: &mut [ReconciledRecord]) {
    records.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| ref_id(&a.workload).cmp(ref_id(&b.workload)))
            .then_with(|| ref_id(&a.server).cmp(ref_id(&b.server)))
    });
}

fn ref_id(r: &Option<super::RecordRef>) -> &str {
    r.as_ref().map_or("", |r| r.id.as_str())
}
