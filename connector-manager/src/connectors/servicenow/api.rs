use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use ven_monitor::fetch::{Page, PageRequest, PageSource, RequestError};

use crate::connectors::http::{build_client, check_response, total_count, transport_error};

/// One CMDB row as returned by the Table API.
pub type TableRecord = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct TableResponse {
    #[serde(default)]
    result: Option<Vec<TableRecord>>,
}

/// Keys at or above this length are treated as OAuth tokens.
const TOKEN_MIN_LEN: usize = 100;

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

impl AuthScheme {
    /// Basic auth for a plain user name with a short key, bearer otherwise
    /// (e-mail style user names or long tokens).
    pub fn select(api_user: &str, api_key: &str) -> Self {
        if api_user.contains('@') || api_key.len() >= TOKEN_MIN_LEN {
            AuthScheme::Bearer
        } else {
            AuthScheme::Basic
        }
    }
}

/// Builds the encoded query for the operating-entity filter.
///
/// Matches the custom `u_operating_entity` field, the standard
/// `operating_entity` field or the company name. Single quotes in the
/// filter are escaped.
pub fn build_query(operating_entity_contains: &str) -> Option<String> {
    let filter = operating_entity_contains.trim();
    if filter.is_empty() {
        return None;
    }
    let safe = filter.replace('\'', "\\'");
    Some(format!(
        "u_operating_entityLIKE{0}^ORoperating_entityLIKE{0}^ORcompanyLIKE{0}",
        safe
    ))
}

/// HTTP client for the ServiceNow Table API.
pub struct ServiceNowClient {
    api_user: String,
    api_key: String,
    auth: AuthScheme,
    http_client: Client,
    base_url: String,
    table: String,
    query: Option<String>,
}

impl ServiceNowClient {
    /// `instance_url` is the instance root (e.g. `https://acme.service-now.com`
    /// or a mock server URL).
    pub fn new(
        instance_url: &str,
        table: String,
        api_user: String,
        api_key: String,
        query: Option<String>,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self> {
        let auth = AuthScheme::select(&api_user, &api_key);
        Ok(Self {
            api_user,
            api_key,
            auth,
            http_client: build_client(timeout, verify_tls)?,
            base_url: format!("{}/api/now/table", instance_url.trim_end_matches('/')),
            table,
            query,
        })
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth
    }

    pub fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth {
            AuthScheme::Basic => request.basic_auth(&self.api_user, Some(&self.api_key)),
            AuthScheme::Bearer => request.bearer_auth(&self.api_key),
        }
    }

    /// Fetch one page using `sysparm_limit` / `sysparm_offset`.
    pub async fn fetch_page(&self, request: PageRequest) -> Result<Page<TableRecord>, RequestError> {
        let mut params = vec![
            ("sysparm_limit", request.limit.to_string()),
            ("sysparm_offset", request.offset.to_string()),
        ];
        if let Some(query) = &self.query {
            params.push(("sysparm_query", query.clone()));
        }

        let response = self
            .authorize(self.http_client.get(self.table_url()))
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_response(response).await?;
        let total = total_count(&response);
        let body = response
            .json::<TableResponse>()
            .await
            .map_err(transport_error)?;
        let records = body.result.ok_or_else(|| {
            RequestError::Permanent("response has no 'result' field".to_string())
        })?;

        Ok(match total {
            Some(total) => Page::with_total(records, request.offset, total),
            None => Page::new(records),
        })
    }
}

#[async_trait]
impl PageSource for ServiceNowClient {
    type Record = TableRecord;

    fn name(&self) -> &str {
        "servicenow.table"
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<TableRecord>, RequestError> {
        ServiceNowClient::fetch_page(self, request).await
    }
}
