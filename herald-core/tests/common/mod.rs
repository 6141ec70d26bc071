#![allow(dead_code)]

use herald_core::config::{BackoffConfig, BusConfig, InitialWatermark};
use herald_core::store::memory::MemoryBackend;
use herald_core::{Event, EventBus, EventHandler, HandlerError, NewEvent, Publisher, QueryService};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CATCH_UP: Duration = Duration::from_millis(50);

/// Tight timings so the workers cycle quickly.
pub fn fast_config(subscriber: &str) -> BusConfig {
    let mut config = BusConfig {
        subscriber: subscriber.into(),
        ..BusConfig::default()
    };
    config.listener.catch_up_interval = CATCH_UP;
    config.listener.batch_size = 3;
    config.listener.initial_watermark = InitialWatermark::Beginning;
    config.listener.reconnect_backoff =
        BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(40));
    config.watchdog.interval = Duration::from_millis(100);
    config.watchdog.staleness_threshold = Duration::from_secs(2);
    config.watchdog.restart_backoff =
        BackoffConfig::new(Duration::from_millis(50), Duration::from_millis(200));
    config.startup.connect_attempts = 3;
    config.startup.backoff = BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(20));
    config
}

pub fn bus(memory: &MemoryBackend, config: BusConfig) -> EventBus {
    EventBus::new(config, memory.backend())
}

pub fn event(channel: &str, n: i64) -> NewEvent {
    NewEvent::new(channel, "test.event", "tests").with_payload(serde_json::json!({ "n": n }))
}

pub async fn publish_n(publisher: &Publisher, channel: &str, n: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 0..n {
        ids.push(publisher.publish(event(channel, i)).await.unwrap().id);
    }
    ids
}

/// Records every event id it sees; fails for the ids in `fail_on`.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Event>>>,
    fail_on: Arc<Mutex<Vec<i64>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(ids: &[i64]) -> Self {
        let recorder = Self::default();
        recorder.fail_on.lock().unwrap().extend_from_slice(ids);
        recorder
    }

    pub fn ids(&self) -> Vec<i64> {
        self.seen.lock().unwrap().iter().map(|e| e.id).collect()
    }

    /// Ids of non-system events.
    pub fn data_ids(&self) -> Vec<i64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.channel != "system")
            .map(|e| e.id)
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event.clone());
        if self.fail_on.lock().unwrap().contains(&event.id) {
            return Err(HandlerError::new(format!("rejecting event {}", event.id)));
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait until the stored watermark of `subscriber` reaches `id`.
pub async fn wait_for_watermark(memory: &MemoryBackend, subscriber: &str, id: i64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if memory.store.watermark(subscriber).await >= Some(id) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait until exactly `count` handler failures are recorded.
pub async fn wait_for_failures(query: &QueryService, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if query.failures(None, 100).await.is_ok_and(|f| f.len() == count) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn strictly_increasing(ids: &[i64]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}
