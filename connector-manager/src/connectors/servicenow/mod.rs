pub mod api;
pub mod transformer;

use crate::connectors::http::{check_connection, RunDeadline};
use crate::Connector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;
use ven_monitor::config::MonitorConfig;
use ven_monitor::fetch::{FetchLimits, FetchReport, PaginatedFetcher, RetryPolicy};
use ven_monitor::inventory::RawCmdbServer;

use self::api::{build_query, ServiceNowClient};
use self::transformer::server_from_record;

/// ServiceNow CMDB connector: pages through one CMDB table, optionally
/// filtered by operating entity.
pub struct ServiceNowConnector {
    client: ServiceNowClient,
    fetcher: PaginatedFetcher,
    retry: RetryPolicy,
    deadline: RunDeadline,
}

impl ServiceNowConnector {
    pub fn new(client: ServiceNowClient, limits: FetchLimits, retry: RetryPolicy) -> Self {
        let deadline = RunDeadline::new(limits.timeout);
        Self {
            client,
            fetcher: PaginatedFetcher::new(limits, retry.clone()),
            retry,
            deadline,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let servicenow = &config.servicenow;
        let query = build_query(&config.filtering.operating_entity_contains);
        if let Some(query) = &query {
            info!(query = %query, "CMDB operating entity filter active");
        }
        let client = ServiceNowClient::new(
            &servicenow.instance_url,
            servicenow.table.clone(),
            servicenow.api_user.clone(),
            servicenow.api_key.clone(),
            query,
            Duration::from_secs(servicenow.timeout_secs),
            servicenow.verify_tls,
        )
        .context("Failed to create ServiceNow client")?;
        Ok(Self::new(
            client,
            servicenow.fetch_limits(&config.fetch),
            RetryPolicy::from(&config.retry),
        ))
    }
}

#[async_trait]
impl Connector for ServiceNowConnector {
    type Record = RawCmdbServer;

    fn name(&self) -> &str {
        "servicenow"
    }

    async fn test_connection(&self) -> Result<()> {
        check_connection(&self.client, &self.retry, self.deadline.start())
            .await
            .with_context(|| format!("ServiceNow connection test failed ({})", self.client.table_url()))
    }

    async fn fetch(&self) -> Result<FetchReport<RawCmdbServer>> {
        let report = self
            .fetcher
            .fetch_all_until(&self.client, self.deadline.finish())
            .await;

        if let Some(sample) = report.outcome.records().first() {
            let custom: Vec<&str> = sample
                .keys()
                .filter(|k| k.starts_with("u_"))
                .map(String::as_str)
                .take(10)
                .collect();
            if !custom.is_empty() {
                info!(fields = ?custom, "Discovered custom CMDB fields");
            }
        }
        info!(
            servers = report.outcome.records().len(),
            complete = report.outcome.is_complete(),
            "Fetched CMDB servers"
        );

        Ok(report.map_records(|record| server_from_record(&record)))
    }
}
