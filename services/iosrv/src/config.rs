//! Service configuration.
//!
//! Layered with figment: built-in defaults, an optional TOML file, then
//! `IOSRV_`-prefixed environment variables (`IOSRV_POLLING__INTERVAL_MS`
//! and friends).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{IoSrvError, Result};

/// Default API port for the I/O service
pub const DEFAULT_PORT: u16 = 6050;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Redis pub/sub endpoint for notifications; omit to run without
    /// an external sink
    pub redis_url: Option<String>,
    pub polling: PollingConfig,
    pub device_defaults: DeviceDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database URL, e.g. `sqlite:iosrv.db`
    pub url: String,
}

/// Poll loop behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Master switch; when false the scheduler never starts
    pub enabled: bool,
    /// Scheduler tick interval in milliseconds
    pub interval_ms: u64,
    /// Pause polling entirely while nobody is subscribed
    pub demand_based: bool,
    /// Devices polled concurrently within one tick; 1 = sequential
    pub max_concurrent_polls: usize,
}

impl PollingConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

/// Defaults applied when a device row does not specify its own values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDefaults {
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis_url: None,
            polling: PollingConfig::default(),
            device_defaults: DeviceDefaults::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:iosrv.db?mode=rwc".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            demand_based: true,
            max_concurrent_polls: 1,
        }
    }
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            poll_interval_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then TOML file (if any), then env
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("iosrv.toml"));
        }

        figment
            .merge(Env::prefixed("IOSRV_").split("__"))
            .extract()
            .map_err(|e| IoSrvError::config(format!("Failed to load configuration: {}", e)))
    }
}
