//! Listener status and operator replay.

use serde::{Deserialize, Serialize};

/// Connection state of a listener, as reported by `GET /listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerStateName {
    Disconnected,
    Connecting,
    Listening,
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStatusResponse {
    pub subscriber: String,
    pub state: ListenerStateName,
    pub last_processed_id: i64,
    /// Unix timestamp of the last watermark advance.
    pub last_advanced_at: i64,
    /// Unix timestamp of the last listener loop iteration.
    pub heartbeat_at: i64,
    /// Number of leases (connections) created so far.
    pub lease_generation: u64,
    /// Consecutive failed connection attempts since the last success.
    pub connect_failures: u32,
}

/// Body of `POST /listener/replay`.
///
/// Rewinds the subscriber watermark so that every event with an id greater
/// than `from_id` is dispatched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub from_id: i64,
}
