use std::collections::{BTreeMap, HashMap};
use ven_monitor::inventory::{AgentStatus, RawWorkload};

use super::api::{PceLabel, PceWorkload};

/// Label href → (dimension, value), used to resolve workload label refs.
#[derive(Debug, Default, Clone)]
pub struct LabelCache {
    labels: HashMap<String, (String, String)>,
}

impl LabelCache {
    pub fn from_labels(labels: Vec<PceLabel>) -> Self {
        let labels = labels
            .into_iter()
            .map(|l| {
                (
                    l.href,
                    (l.key.unwrap_or_default(), l.value.unwrap_or_default()),
                )
            })
            .collect();
        Self { labels }
    }

    pub fn resolve(&self, href: &str) -> Option<(&str, &str)> {
        self.labels
            .get(href)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Transform a PCE workload into the inventory record.
///
/// Labels are resolved through `labels`; refs missing from the cache are
/// dropped. The primary IP is the first interface with an address.
pub fn workload_from_api(workload: PceWorkload, labels: &LabelCache) -> RawWorkload {
    let agent = workload.agent.unwrap_or_default();
    let agent_status = agent.status.unwrap_or_default();
    let online = workload.online.unwrap_or(false);
    let managed = workload.managed.unwrap_or(false);

    let status = AgentStatus::derive(managed, agent_status.status.as_deref(), online);

    let primary_ip = workload
        .interfaces
        .unwrap_or_default()
        .into_iter()
        .filter_map(|i| i.address)
        .find(|a| !a.is_empty())
        .unwrap_or_default();

    let mut resolved = BTreeMap::new();
    for label_ref in workload.labels.unwrap_or_default() {
        if let Some((key, value)) = labels.resolve(&label_ref.href) {
            if !key.is_empty() {
                resolved.insert(key.to_string(), value.to_string());
            }
        }
    }

    RawWorkload {
        href: workload.href.unwrap_or_default(),
        name: workload.name.unwrap_or_default(),
        hostname: workload.hostname.unwrap_or_default(),
        agent_status: status,
        online,
        managed,
        ven_version: agent_status.agent_version.unwrap_or_default(),
        enforcement_mode: workload.enforcement_mode.unwrap_or_default(),
        visibility_level: workload.visibility_level.unwrap_or_default(),
        os_type: workload.os_type.unwrap_or_default(),
        primary_ip,
        last_heartbeat: agent_status.last_heartbeat_on.unwrap_or_default(),
        labels: resolved,
    }
}
