use crate::normalize::{normalize, NormalizedKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;


/// VEN state as reported by the PCE for one workload.
///
/// Raw status strings that match none of the known states are kept in
/// `Unknown` so they can be surfaced for review instead of failing the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Offline,
    Suspended,
    Uninstalled,
    /// Workload exists in the PCE but is not managed by a VEN.
    Unmanaged,
    Unknown(String),
}

impl AgentStatus {
    /// Parses a raw status string (case-insensitive). `online` is accepted
    /// as an alias for `active`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "active" | "online" => AgentStatus::Active,
            "offline" => AgentStatus::Offline,
            "suspended" => AgentStatus::Suspended,
            "uninstalled" => AgentStatus::Uninstalled,
            "unmanaged" => AgentStatus::Unmanaged,
            other => AgentStatus::Unknown(other.to_string()),
        }
    }

    /// Derives the status from the workload-level PCE fields.
    ///
    /// An unmanaged workload has no VEN regardless of what the agent block
    /// says. Otherwise the agent-reported status wins, and only when it is
    /// absent does the `online` flag decide between active and offline.
    pub fn derive(managed: bool, reported: Option<&str>, online: bool) -> Self {
        if !managed {
            return AgentStatus::Unmanaged;
        }
        match reported.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Self::parse(raw),
            None if online => AgentStatus::Active,
            None => AgentStatus::Offline,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Offline => "offline",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Uninstalled => "uninstalled",
            AgentStatus::Unmanaged => "unmanaged",
            AgentStatus::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One workload reported by the Illumio PCE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawWorkload {
    /// PCE href, e.g. `/orgs/1/workloads/8d1c...`
    pub href: String,
    pub name: String,
    pub hostname: String,
    pub agent_status: AgentStatus,
    pub online: bool,
    pub managed: bool,
    pub ven_version: String,
    pub enforcement_mode: String,
    pub visibility_level: String,
    pub os_type: String,
    pub primary_ip: String,
    pub last_heartbeat: String,
    /// Resolved labels, keyed by label dimension (`role`, `app`, `env`, `loc`, ...)
    pub labels: BTreeMap<String, String>,
}

impl RawWorkload {
    /// Minimal workload with the given hostname and agent status; the
    /// remaining fields are empty.
    pub fn new(hostname: impl Into<String>, agent_status: AgentStatus) -> Self {
        let online = agent_status == AgentStatus::Active;
        Self {
            href: String::new(),
            name: String::new(),
            hostname: hostname.into(),
            agent_status,
            online,
            managed: true,
            ven_version: String::new(),
            enforcement_mode: String::new(),
            visibility_level: String::new(),
            os_type: String::new(),
            primary_ip: String::new(),
            last_heartbeat: String::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> NormalizedKey {
        normalize(&self.hostname)
    }

    pub fn label(&self, dimension: &str) -> Option<&str> {
        self.labels.get(dimension).map(String::as_str)
    }
}

/// One server row from the ServiceNow CMDB table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawCmdbServer {
    pub sys_id: String,
    pub name: String,
    pub hostname: String,
    pub operating_entity: String,
    pub ip_address: String,
    pub environment: String,
    pub application: String,
    pub os: String,
    pub operational_status: String,
    pub location: String,
    /// Custom `u_*` fields, display values already flattened to strings.
    pub attributes: BTreeMap<String, String>,
}

impl RawCmdbServer {
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            sys_id: String::new(),
            name: hostname.clone(),
            hostname,
            operating_entity: String::new(),
            ip_address: String::new(),
            environment: String::new(),
            application: String::new(),
            os: String::new(),
            operational_status: String::new(),
            location: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> NormalizedKey {
        normalize(&self.hostname)
    }
}
