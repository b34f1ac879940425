pub mod api;
pub mod transformer;

use crate::connectors::http::{check_connection, RunDeadline};
use crate::Connector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use ven_monitor::config::MonitorConfig;
use ven_monitor::fetch::{FetchLimits, FetchReport, PaginatedFetcher, RetryPolicy};
use ven_monitor::inventory::RawWorkload;

use self::api::IllumioClient;
use self::transformer::{workload_from_api, LabelCache};

/// Illumio PCE connector: fetches labels, then workloads, and resolves the
/// workload label refs into the inventory records.
pub struct IllumioConnector {
    client: IllumioClient,
    fetcher: PaginatedFetcher,
    retry: RetryPolicy,
    deadline: RunDeadline,
}

impl IllumioConnector {
    pub fn new(client: IllumioClient, limits: FetchLimits, retry: RetryPolicy) -> Self {
        let deadline = RunDeadline::new(limits.timeout);
        Self {
            client,
            fetcher: PaginatedFetcher::new(limits, retry.clone()),
            retry,
            deadline,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let illumio = &config.illumio;
        let client = IllumioClient::with_base_url(
            illumio.api_base(),
            illumio.api_user.clone(),
            illumio.api_secret.clone(),
            Duration::from_secs(illumio.timeout_secs),
            illumio.verify_tls,
        )
        .context("Failed to create Illumio client")?;
        Ok(Self::new(
            client,
            illumio.fetch_limits(&config.fetch),
            RetryPolicy::from(&config.retry),
        ))
    }

    /// Fetches every label. A partial label set only leaves some workload
    /// labels unresolved, so it is logged rather than failed.
    async fn fetch_labels(&self, deadline: Instant) -> LabelCache {
        let report = self
            .fetcher
            .fetch_all_until(&self.client.labels(), deadline)
            .await;
        if !report.outcome.is_complete() {
            warn!(
                failed_pages = report.outcome.failures().len(),
                timed_out = report.outcome.timed_out(),
                "Label fetch incomplete, some workload labels will be unresolved"
            );
        }
        let cache = LabelCache::from_labels(report.outcome.into_records());
        info!(labels = cache.len(), "Fetched PCE labels");
        cache
    }
}

#[async_trait]
impl Connector for IllumioConnector {
    type Record = RawWorkload;

    fn name(&self) -> &str {
        "illumio"
    }

    async fn test_connection(&self) -> Result<()> {
        check_connection(&self.client.workloads(), &self.retry, self.deadline.start())
            .await
            .with_context(|| format!("Illumio PCE connection test failed ({})", self.client.base_url()))
    }

    async fn fetch(&self) -> Result<FetchReport<RawWorkload>> {
        // Labels and workloads share the window opened by the connection check.
        let deadline = self.deadline.finish();
        let labels = self.fetch_labels(deadline).await;
        let report = self
            .fetcher
            .fetch_all_until(&self.client.workloads(), deadline)
            .await;
        info!(
            workloads = report.outcome.records().len(),
            complete = report.outcome.is_complete(),
            "Fetched PCE workloads"
        );
        Ok(report.map_records(|w| workload_from_api(w, &labels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use ven_monitor::fetch::FetchOutcome;
    use ven_monitor::inventory::AgentStatus;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: false,
            rate_limit_fallback: Duration::from_millis(5),
        }
    }

    fn connector(server: &mockito::ServerGuard, page_size: usize) -> IllumioConnector {
        connector_with_timeout(server, page_size, Duration::from_secs(10))
    }

    fn connector_with_timeout(
        server: &mockito::ServerGuard,
        page_size: usize,
        timeout: Duration,
    ) -> IllumioConnector {
        let client = IllumioClient::with_base_url(
            server.url(),
            "api_user".to_string(),
            "api_secret".to_string(),
            Duration::from_secs(5),
            true,
        )
        .unwrap();
        IllumioConnector::new(
            client,
            FetchLimits {
                page_size,
                max_concurrent: 2,
                max_pages: 100,
                timeout,
            },
            fast_retry(),
        )
    }

    fn at_offset(offset: usize, limit: usize) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("offset".into(), offset.to_string()),
            Matcher::UrlEncoded("max_results".into(), limit.to_string()),
        ])
    }

    #[test]
    fn test_connector_metadata() {
        let config = ven_monitor::config::parse_config(
            r#"
            [illumio]
            pce_url = "https://pce.example.com"
            org_id = "3"
            api_user = "u"
            api_secret = "s"

            [servicenow]
            instance_url = "https://acme.service-now.com"
            api_user = "u"
            api_key = "k"
            "#,
            &|_: &str| None,
        )
        .unwrap();
        let connector = IllumioConnector::from_config(&config).unwrap();
        assert_eq!(connector.name(), "illumio");
        assert_eq!(
            connector.client.base_url(),
            "https://pce.example.com:8443/api/v2/orgs/3"
        );
    }

    #[tokio::test]
    async fn test_fetch_resolves_labels_across_pages() {
        let mut server = Server::new_async().await;
        let _labels = server
            .mock("GET", "/labels")
            .match_query(at_offset(0, 2))
            .with_status(200)
            .with_body(r#"[{"href": "/orgs/1/labels/1", "key": "env", "value": "Prod"}]"#)
            .create_async()
            .await;
        let _page0 = server
            .mock("GET", "/workloads")
            .match_query(at_offset(0, 2))
            .with_status(200)
            .with_body(
                r#"[
                    {"href": "/w/1", "hostname": "web01", "managed": true, "online": true,
                     "labels": [{"href": "/orgs/1/labels/1"}]},
                    {"href": "/w/2", "hostname": "web02", "managed": true, "online": false}
                ]"#,
            )
            .create_async()
            .await;
        let _page1 = server
            .mock("GET", "/workloads")
            .match_query(at_offset(2, 2))
            .with_status(200)
            .with_body(r#"[{"href": "/w/3", "hostname": "web03", "managed": false}]"#)
            .create_async()
            .await;
        let _page2 = server
            .mock("GET", "/workloads")
            .match_query(at_offset(4, 2))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let report = connector(&server, 2).fetch().await.unwrap();

        assert!(report.outcome.is_complete());
        let mut workloads = report.outcome.into_records();
        workloads.sort_by(|a, b| a.href.cmp(&b.href));
        assert_eq!(workloads.len(), 3);
        assert_eq!(workloads[0].label("env"), Some("Prod"));
        assert_eq!(workloads[1].agent_status, AgentStatus::Offline);
        assert_eq!(workloads[2].agent_status, AgentStatus::Unmanaged);
    }

    #[tokio::test]
    async fn test_unreachable_workloads_fail() {
        let mut server = Server::new_async().await;
        let _labels = server
            .mock("GET", "/labels")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let _workloads = server
            .mock("GET", "/workloads")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let report = connector(&server, 50).fetch().await.unwrap();

        match report.outcome {
            FetchOutcome::Failed { reason, .. } => assert!(reason.contains("500")),
            other => panic!("expected failed outcome, got {:?}", other.is_complete()),
        }
    }

    #[tokio::test]
    async fn test_connection_requests_one_workload() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("GET", "/workloads")
            .match_query(at_offset(0, 1))
            .with_status(200)
            .with_body(r#"[{"href": "/w/1", "hostname": "web01"}]"#)
            .create_async()
            .await;

        assert!(connector(&server, 500).test_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_rejects_bad_credentials() {
        let mut server = Server::new_async().await;
        let _denied = server
            .mock("GET", "/workloads")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = connector(&server, 500).test_connection().await.unwrap_err();
        assert!(format!("{:#}", err).contains("authentication failed"));
    }

    #[tokio::test]
    async fn test_fetch_shares_deadline_with_connection_check() {
        let mut server = Server::new_async().await;
        let _labels = server
            .mock("GET", "/labels")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let _workloads = server
            .mock("GET", "/workloads")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"href": "/w/1", "hostname": "web01"}]"#)
            .create_async()
            .await;

        let connector = connector_with_timeout(&server, 50, Duration::from_millis(300));
        connector.test_connection().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        // The window opened by the check has closed; nothing is fetched.
        let report = connector.fetch().await.unwrap();
        assert!(report.outcome.is_failed());
        assert!(report.outcome.timed_out());

        // The next run gets a fresh window.
        let report = connector.fetch().await.unwrap();
        assert!(report.outcome.is_complete());
        assert_eq!(report.outcome.records().len(), 1);
    }
}
