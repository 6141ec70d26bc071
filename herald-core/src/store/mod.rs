//! Storage seams of the bus.
//!
//! Everything the publisher, the listener and the background workers need
//! from the outside world goes through four traits:
//!
//! - [`EventStore`]: the append-only event log (source of truth).
//! - [`SubscriberStore`]: per-subscriber watermarks and handler failures.
//! - [`WakeupSource`] / [`WakeupSignal`]: the lossy low-latency signal
//!   telling listeners that something new was committed.
//!
//! Postgres implementations live in [`postgres`]; [`memory`] holds an
//! in-process implementation with fault injection for tests.

pub mod memory;
pub mod postgres;

use crate::entities::event::{Event, EventCount, EventFilter, NewEvent};
use crate::entities::handler_failure::{HandlerFailure, RecordHandlerFailure};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("wake-up connection lost")]
    SignalLost,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::SignalLost => true,
            StoreError::Database(err) => is_transient_sqlx(err),
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            // connection exceptions, operator intervention, serialization
            // failures and deadlocks
            code.starts_with("08")
                || code.starts_with("57P")
                || code == "40001"
                || code == "40P01"
        }),
        _ => false,
    }
}

/// The durable event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically insert `event`, assigning its id and `created_at`.
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Up to `limit` events with `id > after_id`, ordered by id.
    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<Event>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Event>, StoreError>;

    async fn latest_event_id(&self) -> Result<Option<i64>, StoreError>;

    async fn first_event_id_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError>;

    async fn list(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError>;

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError>;

    async fn count_by_type(
        &self,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<EventCount>, StoreError>;

    /// Delete every event created more than `max_age` ago by the store's own
    /// clock. Returns the number removed.
    async fn delete_older_than(&self, max_age: Duration) -> Result<u64, StoreError>;

    /// Cheap round trip used to decide whether the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Durable state belonging to named subscribers.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn load_watermark(&self, subscriber: &str) -> Result<Option<i64>, StoreError>;

    /// Store `last_processed_id` if it is greater than the stored value.
    async fn advance_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError>;

    /// Store `last_processed_id` unconditionally.
    async fn rewind_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError>;

    async fn record_failure(&self, failure: RecordHandlerFailure) -> Result<(), StoreError>;

    async fn list_failures(
        &self,
        subscriber: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HandlerFailure>, StoreError>;
}

/// A wake-up received on a live lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    /// Id of the committed event, if the signal carried a parsable one.
    pub event_id: Option<i64>,
}

/// Hands out signal connections ("leases").
#[async_trait]
pub trait WakeupSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WakeupLease>, StoreError>;
}

/// One live signal connection.
#[async_trait]
pub trait WakeupLease: Send {
    /// Wait for the next wake-up.
    ///
    /// Returns [`StoreError::SignalLost`] once the connection is gone; signals
    /// sent in the meantime may have been dropped.
    async fn recv(&mut self) -> Result<Wakeup, StoreError>;
}

/// Sends wake-ups after a commit. Best effort: a signal nobody is listening
/// for is lost.
#[async_trait]
pub trait WakeupSignal: Send + Sync {
    async fn signal(&self, event: &Event) -> Result<(), StoreError>;
}

/// The set of store implementations one bus runs against.
#[derive(Clone)]
pub struct Backend {
    pub events: Arc<dyn EventStore>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub wakeups: Arc<dyn WakeupSource>,
    pub signal: Arc<dyn WakeupSignal>,
}

impl Backend {
    /// Postgres tables for the log and subscriber state, `LISTEN/NOTIFY` on
    /// `signal_channel` for wake-ups.
    pub fn postgres(pool: sqlx::PgPool, signal_channel: &str) -> Self {
        let store = Arc::new(postgres::PgEventStore::new(pool.clone()));
        let wakeups = Arc::new(postgres::PgWakeups::new(pool, signal_channel));
        Self {
            events: store.clone(),
            subscribers: store,
            wakeups: wakeups.clone(),
            signal: wakeups,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
