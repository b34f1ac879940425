//! Loads the monitor configuration file, resolving `${VAR}` / `$VAR`
//! references from the process environment.

use anyhow::{Context, Result};
use std::path::Path;
use ven_monitor::config::{parse_config, MonitorConfig};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "VEN_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Path of the configuration file: `$VEN_MONITOR_CONFIG` or the default.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_config(path: impl AsRef<Path>) -> Result<MonitorConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&contents, &|name: &str| std::env::var(name).ok())
        .with_context(|| format!("Failed to load config file {}", path.display()))
}
