use super::BackoffConfig;
use std::time::Duration;

/// Where a subscriber without a stored watermark starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialWatermark {
    /// Skip everything already in the store.
    #[default]
    Latest,
    /// Replay events created within this window before the first start.
    Lookback(Duration),
    /// Replay the whole retained log.
    Beginning,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Period of the catch-up sweep while listening.
    pub catch_up_interval: Duration,
    /// Maximum events fetched per catch-up query.
    pub batch_size: i64,
    pub initial_watermark: InitialWatermark,
    /// Delay between reconnect attempts after the lease is lost.
    pub reconnect_backoff: BackoffConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            catch_up_interval: Duration::from_secs(5),
            batch_size: 500,
            initial_watermark: InitialWatermark::default(),
            reconnect_backoff: BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(60)),
        }
    }
}
