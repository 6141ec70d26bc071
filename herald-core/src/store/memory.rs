//! In-process store with fault injection.
//!
//! Behaves like the Postgres implementation (monotonic ids, server-assigned
//! timestamps, lossy wake-ups) but lets a test cut the store off, sever
//! live signal connections and back-date events.

use super::{
    Backend, EventStore, StoreError, SubscriberStore, Wakeup, WakeupLease, WakeupSignal,
    WakeupSource,
};
use crate::entities::event::{Event, EventCount, EventFilter, NewEvent};
use crate::entities::handler_failure::{HandlerFailure, RecordHandlerFailure};
use crate::utils::clock;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast, watch};

const WAKEUP_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    next_event_id: i64,
    watermarks: HashMap<String, i64>,
    failures: Vec<HandlerFailure>,
    next_failure_id: i64,
}

/// [`EventStore`] and [`SubscriberStore`] backed by process memory.
#[derive(Debug)]
pub struct MemoryEventStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    /// Append with an explicit `created_at`, bypassing availability.
    pub async fn insert_at(&self, event: NewEvent, created_at: OffsetDateTime) -> Event {
        let mut state = self.state.lock().await;
        push_event(&mut state, event, created_at)
    }

    /// Every stored event in id order.
    pub async fn snapshot(&self) -> Vec<Event> {
        self.state.lock().await.events.clone()
    }

    pub async fn watermark(&self, subscriber: &str) -> Option<i64> {
        self.state.lock().await.watermarks.get(subscriber).copied()
    }
}

fn push_event(state: &mut State, event: NewEvent, created_at: OffsetDateTime) -> Event {
    state.next_event_id += 1;
    let stored = Event {
        id: state.next_event_id,
        channel: event.channel,
        event_type: event.event_type,
        source: event.source,
        correlation_id: event.correlation_id,
        payload: event.payload,
        created_at,
    };
    state.events.push(stored.clone());
    stored
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(push_event(&mut state, event, OffsetDateTime::now_utc()))
    }

    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<Event>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.id > after_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<Event>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }

    async fn latest_event_id(&self) -> Result<Option<i64>, StoreError> {
        self.check()?;
        Ok(self.state.lock().await.events.last().map(|e| e.id))
    }

    async fn first_event_id_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.created_at >= since)
            .map(|e| e.id)
            .min())
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        let matching = state.events.iter().filter(|e| filter.matches(e));
        let skip = usize::try_from(filter.offset).unwrap_or(0);
        let take = usize::try_from(filter.limit).unwrap_or(0);
        let events = if filter.newest_first {
            matching.rev().skip(skip).take(take).cloned().collect()
        } else {
            matching.skip(skip).take(take).cloned().collect()
        };
        Ok(events)
    }

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect())
    }

    async fn count_by_type(
        &self,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<EventCount>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        let counts = state
            .events
            .iter()
            .filter(|e| since.is_none_or(|since| e.created_at >= since))
            .counts_by(|e| (e.channel.to_string(), e.event_type.to_string()))
            .into_iter()
            .map(|((channel, event_type), count)| EventCount {
                channel,
                event_type,
                count: i64::try_from(count).unwrap_or(i64::MAX),
            })
            .sorted_by(|a, b| (&a.channel, &a.event_type).cmp(&(&b.channel, &b.event_type)))
            .collect();
        Ok(counts)
    }

    async fn delete_older_than(&self, max_age: Duration) -> Result<u64, StoreError> {
        self.check()?;
        let cutoff = clock::cutoff(OffsetDateTime::now_utc(), max_age);
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|e| e.created_at >= cutoff);
        let removed = before - state.events.len();
        let State {
            events, failures, ..
        } = &mut *state;
        failures.retain(|f| events.iter().any(|e| e.id == f.event_id));
        Ok(removed as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[async_trait]
impl SubscriberStore for MemoryEventStore {
    async fn load_watermark(&self, subscriber: &str) -> Result<Option<i64>, StoreError> {
        self.check()?;
        Ok(self.state.lock().await.watermarks.get(subscriber).copied())
    }

    async fn advance_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let entry = state
            .watermarks
            .entry(subscriber.to_string())
            .or_insert(last_processed_id);
        *entry = (*entry).max(last_processed_id);
        Ok(())
    }

    async fn rewind_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .watermarks
            .insert(subscriber.to_string(), last_processed_id);
        Ok(())
    }

    async fn record_failure(&self, failure: RecordHandlerFailure) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.next_failure_id += 1;
        let id = state.next_failure_id;
        state.failures.push(HandlerFailure {
            id,
            event_id: failure.event_id,
            subscriber: failure.subscriber,
            handler: failure.handler,
            error: failure.error,
            failed_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn list_failures(
        &self,
        subscriber: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HandlerFailure>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .failures
            .iter()
            .rev()
            .filter(|f| subscriber.is_none_or(|s| f.subscriber == s))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

/// Lossy in-process wake-ups.
///
/// Signals go to the leases alive at the time of sending. [`sever`]
/// terminates every live lease the way a dropped database connection would.
///
/// [`sever`]: MemoryWakeups::sever
#[derive(Debug)]
pub struct MemoryWakeups {
    tx: broadcast::Sender<i64>,
    generation: watch::Sender<u64>,
    accepting: AtomicBool,
}

impl Default for MemoryWakeups {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWakeups {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WAKEUP_BUFFER);
        let (generation, _) = watch::channel(0);
        Self {
            tx,
            generation,
            accepting: AtomicBool::new(true),
        }
    }

    /// Drop every live lease.
    pub fn sever(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// While not accepting, `connect` and `signal` fail.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Number of live leases.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("signal channel is offline".to_string()))
        }
    }
}

#[async_trait]
impl WakeupSource for MemoryWakeups {
    async fn connect(&self) -> Result<Box<dyn WakeupLease>, StoreError> {
        self.check()?;
        Ok(Box::new(MemoryLease {
            rx: self.tx.subscribe(),
            generation: self.generation.subscribe(),
        }))
    }
}

#[async_trait]
impl WakeupSignal for MemoryWakeups {
    async fn signal(&self, event: &Event) -> Result<(), StoreError> {
        self.check()?;
        // No receivers means nobody is listening; the signal is lost.
        let _ = self.tx.send(event.id);
        Ok(())
    }
}

struct MemoryLease {
    rx: broadcast::Receiver<i64>,
    generation: watch::Receiver<u64>,
}

#[async_trait]
impl WakeupLease for MemoryLease {
    async fn recv(&mut self) -> Result<Wakeup, StoreError> {
        tokio::select! {
            _ = self.generation.changed() => Err(StoreError::SignalLost),
            received = self.rx.recv() => match received {
                Ok(id) => Ok(Wakeup { event_id: Some(id) }),
                Err(broadcast::error::RecvError::Lagged(_)) => Ok(Wakeup { event_id: None }),
                Err(broadcast::error::RecvError::Closed) => Err(StoreError::SignalLost),
            },
        }
    }
}

/// A memory store and wake-up channel wired together.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    pub store: Arc<MemoryEventStore>,
    pub wakeups: Arc<MemoryWakeups>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryEventStore::new()),
            wakeups: Arc::new(MemoryWakeups::new()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend {
            events: self.store.clone(),
            subscribers: self.store.clone(),
            wakeups: self.wakeups.clone(),
            signal: self.wakeups.clone(),
        }
    }

    /// Take the whole store offline (and drop live leases), or bring it back.
    pub fn set_online(&self, online: bool) {
        self.store.set_available(online);
        self.wakeups.set_accepting(online);
        if !online {
            self.wakeups.sever();
        }
    }
}
