//! TOML file configuration structures.
//!
//! These structs directly map to the `herald-config.toml` file format.
//! Every section except `[admin]` and `[service]` may be omitted.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub publish_retry: PublishRetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

/// Service API section: the shared secret publishers sign requests with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub secret: String,
}

/// Where a subscriber without a stored watermark starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    #[default]
    Latest,
    /// Requires `lookback_secs`.
    Lookback,
    Beginning,
}

/// Event bus section. Durations are whole seconds unless the key says
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub subscriber: String,
    pub signal_channel: String,
    pub start_from: StartFrom,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_secs: Option<u64>,
    pub catch_up_interval_secs: u64,
    pub batch_size: i64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub watchdog_interval_secs: u64,
    pub staleness_threshold_secs: u64,
    pub restart_min_secs: u64,
    pub restart_max_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_restarts: Option<u32>,
    pub retention_days: u32,
    pub retention_interval_secs: u64,
    pub connect_attempts: u32,
    /// How long shutdown waits for the bus workers.
    pub stop_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber: "herald-server".to_string(),
            signal_channel: herald_core::config::DEFAULT_SIGNAL_CHANNEL.to_string(),
            start_from: StartFrom::default(),
            lookback_secs: None,
            catch_up_interval_secs: 5,
            batch_size: 500,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 60_000,
            watchdog_interval_secs: 15,
            staleness_threshold_secs: 60,
            restart_min_secs: 5,
            restart_max_secs: 300,
            max_consecutive_restarts: None,
            retention_days: herald_core::config::DEFAULT_RETENTION_DAYS,
            retention_interval_secs: 24 * 60 * 60,
            connect_attempts: 5,
            stop_timeout_secs: 30,
        }
    }
}

/// Retry policy applied to Service API publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRetryConfig {
    /// Total attempts including the first; `1` disables retrying.
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            min_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}
