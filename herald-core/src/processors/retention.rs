//! RetentionReaper processor.
//!
//! Deletes events older than the retention horizon, once at start and then
//! on a fixed schedule. The horizon is read from a [`ConfigStore`] on every
//! run so a reloaded configuration applies without a restart.

use crate::config::{ConfigStore, ConfigWatcher, RetentionConfig};
use crate::store::{EventStore, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct RetentionReaper {
    events: Arc<dyn EventStore>,
    config: ConfigStore<RetentionConfig>,
}

impl RetentionReaper {
    pub fn new(events: Arc<dyn EventStore>, config: ConfigStore<RetentionConfig>) -> Self {
        Self { events, config }
    }

    /// Delete every event older than the horizon. Age is measured by the
    /// store, which also stamped `created_at`.
    pub async fn reap(&self) -> Result<u64, StoreError> {
        let horizon = self.config.read().await.horizon;
        let deleted = self.events.delete_older_than(horizon).await?;
        info!(deleted, ?horizon, "Retention run complete");
        Ok(deleted)
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut config_watcher: ConfigWatcher) {
        info!("RetentionReaper started");
        loop {
            if let Err(err) = self.reap().await {
                warn!(error = %err, "Retention run failed, retrying next cycle");
            }
            let last_run = Instant::now();

            let interval = self.config.read().await.interval;
            let sleep = tokio::time::sleep_until(last_run + interval);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("RetentionReaper shutdown complete");
                            return;
                        }
                    }

                    Ok(()) = config_watcher.changed() => {
                        let config = *self.config.read().await;
                        info!(horizon = ?config.horizon, interval = ?config.interval, "Retention config reloaded");
                        sleep.as_mut().reset(last_run + config.interval);
                    }

                    _ = &mut sleep => break,
                }
            }
        }
    }
}
