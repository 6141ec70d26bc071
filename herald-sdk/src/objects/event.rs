//! Event representations returned by the query endpoints.

use serde::{Deserialize, Serialize};

/// A stored event as exposed over HTTP.
///
/// `created_at` is a unix timestamp in seconds, assigned by the store at
/// write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: i64,
    pub channel: String,
    pub event_type: String,
    pub source: String,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// One row of `GET /stats`: the number of events per channel and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCountResponse {
    pub channel: String,
    pub event_type: String,
    pub count: i64,
}

/// A recorded handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailureResponse {
    pub id: i64,
    pub event_id: i64,
    pub subscriber: String,
    pub handler: String,
    pub error: String,
    pub failed_at: i64,
}
