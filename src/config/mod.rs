use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::kind::ConnectorKind;

/// Snapshot of one connector's configuration.
///
/// Replaced wholesale on every edit; `id` stays the same across edits of one
/// logical connector while `name` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Protocol-specific fields, passed through to the transport untouched
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Address before the most recent edit; set by `Connector::edit`
    #[serde(skip)]
    pub prev_address: Option<String>,
}

fn default_is_active() -> bool {
    true
}

impl ConnectorConfig {
    pub fn new(id: u64, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
            address: address.into(),
            service_name: None,
            options: serde_json::Map::new(),
            prev_address: None,
        }
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// True when the most recent edit moved the connector to a new address.
    pub fn address_changed(&self) -> bool {
        self.prev_address
            .as_deref()
            .is_some_and(|prev| prev != self.address)
    }
}

/// What a store does when asked to add a name it already holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Stop the existing connector and replace it
    Overwrite,
}

/// Reconnect-loop tuning shared by every connector in a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Pause between failed connect attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Warn on every Nth consecutive failed attempt
    #[serde(default = "default_log_every")]
    pub log_every: u64,
    /// Upper bound on a single connect attempt
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Upper bound on how long an inline `start` waits for the first connection.
    /// `None` waits until connected or stopped.
    #[serde(default)]
    pub first_connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub duplicate_names: DuplicatePolicy,
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_log_every() -> u64 {
    10
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            log_every: default_log_every(),
            connect_timeout_secs: None,
            first_connect_timeout_secs: None,
            duplicate_names: DuplicatePolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn first_connect_timeout(&self) -> Option<Duration> {
        self.first_connect_timeout_secs.map(Duration::from_secs)
    }

    /// Never zero, so `attempts % log_every` is always defined.
    pub fn log_every(&self) -> u64 {
        self.log_every.max(1)
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:47120".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// One `[[connectors]]` entry of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorEntry {
    pub kind: ConnectorKind,
    #[serde(flatten)]
    pub config: ConnectorConfig,
}

/// Complete Tether configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Username → password, checked by channel connectors
    #[serde(default)]
    pub api_users: HashMap<String, String>,
    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,
}

impl TetherConfig {
    /// Applies `TETHER_*` environment overrides, ignoring unparsable values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TETHER_API_BIND") {
            self.api.bind = v;
        }
        if let Ok(v) = std::env::var("TETHER_RETRY_DELAY_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.supervisor.retry_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TETHER_FIRST_CONNECT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.supervisor.first_connect_timeout_secs = Some(n);
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<TetherConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: TetherConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
