//! Core configuration types and loading.

use crate::state::DEFAULT_TEMPLATE;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bot identity.
    pub bot: BotConfig,
    /// Platform adapter connection.
    pub bridge: BridgeConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Reconciliation loop timing.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Defaults for newly created spawners.
    #[serde(default)]
    pub naming: NamingConfig,
    /// Event intake and metrics listener.
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Name used in logs and as the HTTP user agent.
    pub name: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the redb file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "dynchan.redb".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation passes (default: 60).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamingConfig {
    /// Template given to spawners created through `create_spawner`.
    #[serde(default = "default_template")]
    pub default_template: String,
    /// Display name of newly created spawners.
    #[serde(default = "default_spawner_name")]
    pub spawner_name: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            default_template: default_template(),
            spawner_name: default_spawner_name(),
        }
    }
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_spawner_name() -> String {
    "+ Spawn Channel".to_string()
}

/// Platform adapter (bridge) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the adapter, e.g. `http://127.0.0.1:8091`.
    pub base_url: String,
    /// Per-request timeout in seconds (default: 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Serve `/metrics` (default: true).
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics: true,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_true() -> bool {
    true
}
