//! Bus configuration.
//!
//! These types hold the validated runtime configuration of the bus workers.
//! Parsing configuration files is the server crate's job; everything here
//! has a usable `Default`.

mod config_store;
mod listener;
mod retention;
mod watchdog;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use listener::{InitialWatermark, ListenerConfig};
pub use retention::{DEFAULT_RETENTION_DAYS, RetentionConfig};
pub use watchdog::WatchdogConfig;

use compact_str::CompactString;
use std::time::Duration;

/// Name of the Postgres `NOTIFY` channel carrying wake-up signals.
pub const DEFAULT_SIGNAL_CHANNEL: &str = "herald_events";

/// Complete configuration for one [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Durable subscriber name; keys the watermark and failure records.
    pub subscriber: CompactString,
    /// Signal channel shared by every topic.
    pub signal_channel: CompactString,
    pub listener: ListenerConfig,
    pub watchdog: WatchdogConfig,
    pub retention: RetentionConfig,
    pub startup: StartupConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber: CompactString::const_new("default"),
            signal_channel: CompactString::const_new(DEFAULT_SIGNAL_CHANNEL),
            listener: ListenerConfig::default(),
            watchdog: WatchdogConfig::default(),
            retention: RetentionConfig::default(),
            startup: StartupConfig::default(),
        }
    }
}

/// How hard the bus tries to reach the store before refusing to start.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Attempts before giving up. At least one attempt is always made.
    pub connect_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            backoff: BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(10)),
        }
    }
}

/// Bounds of an exponential backoff: the delay starts at `min`, doubles on
/// every consecutive failure, and never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}
