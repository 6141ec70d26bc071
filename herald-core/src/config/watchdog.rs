use super::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Period between health checks.
    pub interval: Duration,
    /// How long the listener may go without a heartbeat, stay disconnected,
    /// or sit on a backlog without advancing before it is restarted.
    pub staleness_threshold: Duration,
    /// Spacing between consecutive forced restarts.
    pub restart_backoff: BackoffConfig,
    /// Give up (halt the listener) after this many consecutive forced
    /// restarts. `None` never gives up.
    pub max_consecutive_restarts: Option<u32>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            staleness_threshold: Duration::from_secs(60),
            restart_backoff: BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(300)),
            max_consecutive_restarts: None,
        }
    }
}
