//! Messages exchanged between the bus workers.
//!
//! The listener owns its lease and its watermark. The watchdog and the
//! operator-facing [`BusHandle`](crate::bus::BusHandle) only read
//! [`ListenerStatus`] and send [`ListenerCommand`]s.

use crate::store::StoreError;
use herald_sdk::objects::ListenerStateName;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Listening,
    /// Terminal. Entered on shutdown or when the watchdog gives up.
    Halted,
}

impl From<ListenerState> for ListenerStateName {
    fn from(value: ListenerState) -> Self {
        match value {
            ListenerState::Disconnected => ListenerStateName::Disconnected,
            ListenerState::Connecting => ListenerStateName::Connecting,
            ListenerState::Listening => ListenerStateName::Listening,
            ListenerState::Halted => ListenerStateName::Halted,
        }
    }
}

/// Snapshot of the listener, published on every loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    pub state: ListenerState,
    /// When `state` was entered.
    pub state_since: Instant,
    pub last_processed_id: i64,
    pub last_advanced_at: Instant,
    pub heartbeat_at: Instant,
    /// Leases created so far; bumps on every successful connect.
    pub lease_generation: u64,
    /// Consecutive failed connects since the last success.
    pub connect_failures: u32,
}

impl ListenerStatus {
    pub fn new(last_processed_id: i64) -> Self {
        let now = Instant::now();
        Self {
            state: ListenerState::Disconnected,
            state_since: now,
            last_processed_id,
            last_advanced_at: now,
            heartbeat_at: now,
            lease_generation: 0,
            connect_failures: 0,
        }
    }
}

/// Convert a monotonic instant into wall-clock time, for display.
pub fn wall_clock(instant: Instant) -> OffsetDateTime {
    let age = Instant::now().saturating_duration_since(instant);
    OffsetDateTime::now_utc() - age
}

#[derive(Debug)]
pub enum ListenerCommand {
    /// Drop the current lease and reconnect.
    Restart { reason: String },
    /// Stop for good.
    Halt { reason: String },
    /// Force the watermark to `to_id` so that every later event is
    /// dispatched again. The outcome of the durable write is sent on `reply`.
    Rewind {
        to_id: i64,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}
