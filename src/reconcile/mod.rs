//! Join-and-classify engine.
//!
//! Workloads and CMDB servers are grouped by [`NormalizedKey`] and joined
//! with a full outer join. Every pairing becomes one [`ReconciledRecord`]
//! whose [`ReconStatus`] depends only on which sides are present and on the
//! workload's agent status.

use crate::inventory::{AgentStatus, RawCmdbServer, RawWorkload};
use crate::normalize::NormalizedKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

mod engine;
mod summary;

pub use engine::{classify, reconcile, reconcile_illumio_only};
pub use summary::ReconSummary;

/// Deployment status of one reconciled server.
///
/// Declaration order is the presentation order of the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconStatus {
    DeployedActive,
    DeployedOffline,
    DeployedSuspended,
    DeployedUninstalled,
    NotDeployed,
    NotInCmdb,
}

impl ReconStatus {
    pub const ALL: [ReconStatus; 6] = [
        ReconStatus::DeployedActive,
        ReconStatus::DeployedOffline,
        ReconStatus::DeployedSuspended,
        ReconStatus::DeployedUninstalled,
        ReconStatus::NotDeployed,
        ReconStatus::NotInCmdb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconStatus::DeployedActive => "deployed_active",
            ReconStatus::DeployedOffline => "deployed_offline",
            ReconStatus::DeployedSuspended => "deployed_suspended",
            ReconStatus::DeployedUninstalled => "deployed_uninstalled",
            ReconStatus::NotDeployed => "not_deployed",
            ReconStatus::NotInCmdb => "not_in_cmdb",
        }
    }

    /// True for the four statuses where a VEN record exists for a CMDB server.
    pub fn is_deployed(&self) -> bool {
        matches!(
            self,
            ReconStatus::DeployedActive
                | ReconStatus::DeployedOffline
                | ReconStatus::DeployedSuspended
                | ReconStatus::DeployedUninstalled
        )
    }
}

impl fmt::Display for ReconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a record's two sides were paired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Both sides share the normalized hostname.
    Hostname,
    /// Only one side is present.
    #[serde(rename = "none")]
    NoMatch,
    /// CMDB data was unavailable for the run.
    IllumioOnly,
}

/// Lookup handle for a raw record: its source-assigned id plus the hostname
/// as reported. The engine never owns raw records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    pub id: String,
    pub hostname: String,
}

/// One output row of the reconciliation.
#[derive(Clone, Debug, Serialize)]
pub struct ReconciledRecord {
    pub key: NormalizedKey,
    pub workload: Option<RecordRef>,
    pub server: Option<RecordRef>,
    pub status: ReconStatus,
    pub agent_status: Option<AgentStatus>,
    pub match_type: MatchType,
    /// Agent status was not recognized; status was defaulted for review.
    pub needs_review: bool,
    /// Flattened view of both sides, merged by key union.
    pub attributes: BTreeMap<String, String>,
}

impl ReconciledRecord {
    pub(crate) fn build(
        key: NormalizedKey,
        workload: Option<&RawWorkload>,
        server: Option<&RawCmdbServer>,
        status: ReconStatus,
        match_type: MatchType,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("hostname_normalized".to_string(), key.as_str().to_string());

        if let Some(s) = server {
            let fields = [
                ("cmdb_sys_id", &s.sys_id),
                ("cmdb_name", &s.name),
                ("cmdb_hostname", &s.hostname),
                ("cmdb_ip_address", &s.ip_address),
                ("cmdb_operating_entity", &s.operating_entity),
                ("cmdb_environment", &s.environment),
                ("cmdb_application", &s.application),
                ("cmdb_os", &s.os),
                ("cmdb_operational_status", &s.operational_status),
                ("cmdb_location", &s.location),
            ];
            for (name, value) in fields {
                attributes.insert(name.to_string(), value.clone());
            }
            for (name, value) in &s.attributes {
                attributes.insert(format!("cmdb_{}", name), value.clone());
            }
        }

        if let Some(w) = workload {
            let fields = [
                ("illumio_href", w.href.clone()),
                ("illumio_hostname", w.hostname.clone()),
                ("illumio_name", w.name.clone()),
                ("illumio_primary_ip", w.primary_ip.clone()),
                ("illumio_online", yes_no(w.online)),
                ("illumio_managed", yes_no(w.managed)),
                ("illumio_ven_status", w.agent_status.to_string()),
                ("illumio_ven_version", w.ven_version.clone()),
                ("illumio_enforcement_mode", w.enforcement_mode.clone()),
                ("illumio_visibility_level", w.visibility_level.clone()),
                ("illumio_os_type", w.os_type.clone()),
                ("illumio_last_heartbeat", w.last_heartbeat.clone()),
            ];
            for (name, value) in fields {
                attributes.insert(name.to_string(), value);
            }
            for (dimension, value) in &w.labels {
                attributes.insert(format!("illumio_label_{}", dimension), value.clone());
            }
        }

        let needs_review = matches!(
            workload.map(|w| &w.agent_status),
            Some(AgentStatus::Unknown(_))
        );

        Self {
            key,
            workload: workload.map(|w| RecordRef {
                id: w.href.clone(),
                hostname: w.hostname.clone(),
            }),
            server: server.map(|s| RecordRef {
                id: s.sys_id.clone(),
                hostname: s.hostname.clone(),
            }),
            status,
            agent_status: workload.map(|w| w.agent_status.clone()),
            match_type,
            needs_review,
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes" } else { "No" }.to_string()
}

/// Ordered records plus summary counts, handed read-only to exporters.
#[derive(Clone, Debug, Serialize)]
pub struct Reconciliation {
    pub records: Vec<ReconciledRecord>,
    pub summary: ReconSummary,
}

impl Reconciliation {
    pub fn with_status(&self, status: ReconStatus) -> impl Iterator<Item = &ReconciledRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }

    /// CMDB servers without a VEN.
    pub fn gaps(&self) -> Vec<&ReconciledRecord> {
        self.with_status(ReconStatus::NotDeployed).collect()
    }

    /// VEN workloads unknown to the CMDB.
    pub fn shadow_it(&self) -> Vec<&ReconciledRecord> {
        self.with_status(ReconStatus::NotInCmdb).collect()
    }

    pub fn offline(&self) -> Vec<&ReconciledRecord> {
        self.with_status(ReconStatus::DeployedOffline).collect()
    }

    pub fn suspended(&self) -> Vec<&ReconciledRecord> {
        self.with_status(ReconStatus::DeployedSuspended).collect()
    }

    pub fn needs_review(&self) -> Vec<&ReconciledRecord> {
        self.records.iter().filter(|r| r.needs_review).collect()
    }

    /// Offline or suspended agents plus anything flagged for review, in
    /// output order.
    pub fn health_issues(&self) -> Vec<&ReconciledRecord> {
        self.records
            .iter()
            .filter(|r| {
                r.needs_review
                    || matches!(
                        r.status,
                        ReconStatus::DeployedOffline | ReconStatus::DeployedSuspended
                    )
            })
            .collect()
    }
}
