mod env;

pub use env::{substitute_in_value, substitute_vars};

use crate::fetch::{FetchLimits, RetryPolicy};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub illumio: IllumioConfig,
    pub servicenow: ServiceNowConfig,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Illumio PCE connection
#[derive(Debug, Clone, Deserialize)]
pub struct IllumioConfig {
    pub pce_url: String,
    pub org_id: String,
    pub api_user: String,
    pub api_secret: String,
    #[serde(default = "default_illumio_port")]
    pub port: u16,
    #[serde(default = "default_illumio_page_size")]
    pub page_size: usize,
    #[serde(default = "default_illumio_concurrency")]
    pub max_concurrent_requests: usize,
    /// Per-request timeout (seconds)
    #[serde(default = "default_illumio_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_illumio_port() -> u16 {
    8443
}

fn default_illumio_page_size() -> usize {
    500
}

fn default_illumio_concurrency() -> usize {
    15
}

fn default_illumio_timeout() -> u64 {
    30
}

fn default_verify_tls() -> bool {
    true
}

/// ServiceNow CMDB connection
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceNowConfig {
    pub instance_url: String,
    pub api_user: String,
    pub api_key: String,
    #[serde(default = "default_servicenow_table")]
    pub table: String,
    #[serde(default = "default_servicenow_page_size")]
    pub page_size: usize,
    #[serde(default = "default_servicenow_concurrency")]
    pub max_concurrent_requests: usize,
    /// Per-request timeout (seconds)
    #[serde(default = "default_servicenow_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_servicenow_table() -> String {
    "cmdb_ci_server".to_string()
}

fn default_servicenow_page_size() -> usize {
    10_000
}

fn default_servicenow_concurrency() -> usize {
    10
}

fn default_servicenow_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilteringConfig {
    /// Substring matched against the CMDB operating entity (and company).
    /// Empty means no filter.
    #[serde(default)]
    pub operating_entity_contains: String,
}

/// Retry behaviour for page requests
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Pause after a 429 without `Retry-After`
    #[serde(default = "default_rate_limit_fallback_secs")]
    pub rate_limit_fallback_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_rate_limit_fallback_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_fallback_secs: default_rate_limit_fallback_secs(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
            rate_limit_fallback: Duration::from_secs(config.rate_limit_fallback_secs),
        }
    }
}

/// Bounds shared by both fetches
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Deadline for one whole source fetch (seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_max_pages() -> usize {
    10_000
}

fn default_fetch_timeout_secs() -> u64 {
    1800
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Where extracts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_extracts_folder")]
    pub extracts_folder: String,
    #[serde(default = "default_create_date_subfolder")]
    pub create_date_subfolder: bool,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_base_path() -> String {
    "./outputs".to_string()
}

fn default_extracts_folder() -> String {
    "extracts".to_string()
}

fn default_create_date_subfolder() -> bool {
    true
}

fn default_file_prefix() -> String {
    "illumio_monitoring".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            extracts_folder: default_extracts_folder(),
            create_date_subfolder: default_create_date_subfolder(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl IllumioConfig {
    /// `{pce_url}:{port}/api/v2/orgs/{org_id}`
    pub fn api_base(&self) -> String {
        format!("{}:{}/api/v2/orgs/{}", self.pce_url, self.port, self.org_id)
    }

    pub fn fetch_limits(&self, fetch: &FetchConfig) -> FetchLimits {
        FetchLimits {
            page_size: self.page_size,
            max_concurrent: self.max_concurrent_requests,
            max_pages: fetch.max_pages,
            timeout: Duration::from_secs(fetch.fetch_timeout_secs),
        }
    }
}

impl ServiceNowConfig {
    pub fn fetch_limits(&self, fetch: &FetchConfig) -> FetchLimits {
        FetchLimits {
            page_size: self.page_size,
            max_concurrent: self.max_concurrent_requests,
            max_pages: fetch.max_pages,
            timeout: Duration::from_secs(fetch.fetch_timeout_secs),
        }
    }
}

/// Configuration errors raised before any request is made
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingVariable(String),
    Invalid { field: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVariable(name) => {
                write!(f, "environment variable '{}' is not set", name)
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn normalize_url(field: &str, url: &mut String) -> Result<(), ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(invalid(field, "must start with http:// or https://"));
    }
    *url = trimmed.to_string();
    Ok(())
}

impl MonitorConfig {
    /// Checks value ranges and normalizes URLs (trailing `/` removed).
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        normalize_url("illumio.pce_url", &mut self.illumio.pce_url)?;
        normalize_url("servicenow.instance_url", &mut self.servicenow.instance_url)?;

        let positive = [
            ("illumio.page_size", self.illumio.page_size),
            ("illumio.max_concurrent_requests", self.illumio.max_concurrent_requests),
            ("servicenow.page_size", self.servicenow.page_size),
            ("servicenow.max_concurrent_requests", self.servicenow.max_concurrent_requests),
            ("fetch.max_pages", self.fetch.max_pages),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be greater than 0"));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }
        if self.illumio.org_id.trim().is_empty() {
            return Err(invalid("illumio.org_id", "must not be empty"));
        }
        if self.servicenow.table.trim().is_empty() {
            return Err(invalid("servicenow.table", "must not be empty"));
        }
        Ok(())
    }
}

/// Parses configuration text, substituting variables through `lookup`.
pub fn parse_config<F>(contents: &str, lookup: &F) -> anyhow::Result<MonitorConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut document: toml::Value = toml::from_str(contents).context("Invalid TOML")?;
    substitute_in_value(&mut document, lookup)?;
    let mut config = document
        .try_into::<MonitorConfig>()
        .context("Configuration does not match the expected schema")?;
    config.validate()?;
    Ok(config)
}
