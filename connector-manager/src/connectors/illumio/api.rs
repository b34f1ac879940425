use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;
use std::time::Duration;
use ven_monitor::fetch::{Page, PageRequest, PageSource, RequestError};

use crate::connectors::http::{build_client, check_response, total_count, transport_error};

/// PCE label.
#[derive(Debug, Clone, Deserialize)]
pub struct PceLabel {
    pub href: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Label reference embedded in a workload.
#[derive(Debug, Clone, Deserialize)]
pub struct PceLabelRef {
    pub href: String,
}

/// Network interface of a workload.
#[derive(Debug, Clone, Deserialize)]
pub struct PceInterface {
    #[serde(default)]
    pub address: Option<String>,
}

/// `agent.status` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PceAgentStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub last_heartbeat_on: Option<String>,
}

/// VEN agent attached to a workload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PceAgent {
    #[serde(default)]
    pub status: Option<PceAgentStatus>,
}

/// PCE workload. Every field tolerates `null` or absence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PceWorkload {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub interfaces: Option<Vec<PceInterface>>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub managed: Option<bool>,
    #[serde(default)]
    pub enforcement_mode: Option<String>,
    #[serde(default)]
    pub visibility_level: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<PceLabelRef>>,
    #[serde(default)]
    pub agent: Option<PceAgent>,
}

/// HTTP client for the Illumio PCE REST API (v2).
///
/// Authenticates with HTTP Basic auth using an API key pair. `base_url`
/// is the org-scoped API root, `{pce_url}:{port}/api/v2/orgs/{org_id}`.
pub struct IllumioClient {
    api_user: String,
    api_secret: String,
    http_client: Client,
    base_url: String,
}

impl IllumioClient {
    /// Create a client with an explicit base URL (a mock server in tests).
    pub fn with_base_url(
        base_url: String,
        api_user: String,
        api_secret: String,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self> {
        Ok(Self {
            api_user,
            api_secret,
            http_client: build_client(timeout, verify_tls)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Paged view of `/labels`.
    pub fn labels(&self) -> Collection<'_, PceLabel> {
        Collection::new(self, "labels", "illumio.labels")
    }

    /// Paged view of `/workloads`.
    pub fn workloads(&self) -> Collection<'_, PceWorkload> {
        Collection::new(self, "workloads", "illumio.workloads")
    }

    /// Fetch one page of a collection using `max_results` / `offset`.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        collection: &str,
        request: PageRequest,
    ) -> Result<Page<T>, RequestError> {
        let url = format!("{}/{}", self.base_url, collection);
        let response = self
            .http_client
            .get(&url)
            .basic_auth(&self.api_user, Some(&self.api_secret))
            .header("Accept", "application/json")
            .query(&[("max_results", request.limit), ("offset", request.offset)])
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_response(response).await?;
        let total = total_count(&response);
        let records = response
            .json::<Vec<T>>()
            .await
            .map_err(transport_error)?;

        Ok(match total {
            Some(total) => Page::with_total(records, request.offset, total),
            None => Page::new(records),
        })
    }
}

/// One PCE collection exposed as a [`PageSource`].
pub struct Collection<'a, T> {
    client: &'a IllumioClient,
    path: &'static str,
    name: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T> Collection<'a, T> {
    fn new(client: &'a IllumioClient, path: &'static str, name: &'static str) -> Self {
        Self {
            client,
            path,
            name,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<'a, T> PageSource for Collection<'a, T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Record = T;

    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<T>, RequestError> {
        self.client.fetch_page(self.path, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &mockito::ServerGuard) -> IllumioClient {
        IllumioClient::with_base_url(
            server.url(),
            "api_1a2b".to_string(),
            "secret".to_string(),
            Duration::from_secs(5),
            true,
        )
        .unwrap()
    }

    fn page(offset: usize, limit: usize) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("max_results".into(), limit.to_string()),
            Matcher::UrlEncoded("offset".into(), offset.to_string()),
        ])
    }

    #[tokio::test]
    async fn test_fetch_workloads_page() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/workloads")
            .match_query(page(0, 500))
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {
                        "href": "/orgs/1/workloads/abc",
                        "name": "web01",
                        "hostname": "web01.corp.example.com",
                        "online": true,
                        "managed": true,
                        "enforcement_mode": "full",
                        "interfaces": [{"name": "eth0", "address": "10.0.0.5"}],
                        "labels": [{"href": "/orgs/1/labels/7"}],
                        "agent": {
                            "status": {"status": "active", "agent_version": "23.2.10", "last_heartbeat_on": null},
                            "config": {"mode": "illuminated"}
                        }
                    },
                    {"href": "/orgs/1/workloads/def", "hostname": null, "agent": null}
                ]"#,
            )
            .create_async()
            .await;

        let client = client(&server);
        let page: Page<PceWorkload> = client
            .fetch_page(
                "workloads",
                PageRequest {
                    index: 0,
                    offset: 0,
                    limit: 500,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.more, None);
        let first = &page.records[0];
        assert_eq!(first.hostname.as_deref(), Some("web01.corp.example.com"));
        let status = first.agent.as_ref().and_then(|a| a.status.as_ref()).unwrap();
        assert_eq!(status.agent_version.as_deref(), Some("23.2.10"));
        assert!(page.records[1].agent.is_none());
    }

    #[tokio::test]
    async fn test_total_count_sets_more_flag() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/labels")
            .match_query(page(2, 2))
            .with_status(200)
            .with_header("X-Total-Count", "4")
            .with_body(
                r#"[{"href": "/orgs/1/labels/3", "key": "env", "value": "Prod"},
                    {"href": "/orgs/1/labels/4", "key": "app", "value": "CRM"}]"#,
            )
            .create_async()
            .await;

        let client = client(&server);
        let page: Page<PceLabel> = client
            .fetch_page(
                "labels",
                PageRequest {
                    index: 1,
                    offset: 2,
                    limit: 2,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.more, Some(false));
        assert_eq!(page.records[0].key.as_deref(), Some("env"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_permanent() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/workloads")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error": "not a list"}"#)
            .create_async()
            .await;

        let client = client(&server);
        let err = client
            .fetch_page::<PceWorkload>(
                "workloads",
                PageRequest {
                    index: 0,
                    offset: 0,
                    limit: 10,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Permanent(_)));
    }
}
