use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Default retention horizon in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Events older than this are deleted.
    pub horizon: Duration,
    /// Period between reaper runs.
    pub interval: Duration,
}

impl RetentionConfig {
    pub fn from_days(days: u32) -> Self {
        Self {
            horizon: Duration::from_secs(u64::from(days) * SECONDS_PER_DAY),
            ..Self::default()
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(u64::from(DEFAULT_RETENTION_DAYS) * SECONDS_PER_DAY),
            interval: Duration::from_secs(SECONDS_PER_DAY),
        }
    }
}
