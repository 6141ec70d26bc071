//! WebSocket message types for the live event tail.
//!
//! The `GET /api/v1/admin/events/ws` endpoint upgrades to a WebSocket
//! connection and pushes [`WsServerMessage`] JSON frames for every event the
//! server's own subscriber dispatches.
//!
//! # Protocol
//!
//! 1. Optional `channel` and `correlation_id` query parameters narrow the
//!    stream; without them every event is forwarded.
//! 2. The server sends one [`WsServerMessage::Event`] frame per event, in id
//!    order.
//! 3. If the connection falls behind, the server sends a
//!    [`WsServerMessage::Lagged`] frame; the client is expected to backfill
//!    through `GET /events?after_id=...`.

use serde::{Deserialize, Serialize};

use super::event::EventResponse;

/// Server-to-client WebSocket message.
///
/// ```json
/// {"type":"event","event":{ ... }}
/// {"type":"lagged","skipped":12}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// A dispatched event.
    Event { event: EventResponse },
    /// The server dropped `skipped` events for this connection.
    Lagged { skipped: u64 },
}

/// Filters accepted by the live tail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsTailQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WsTailQuery {
    /// Returns `true` if `event` passes both filters.
    pub fn matches(&self, event: &EventResponse) -> bool {
        let channel_ok = self
            .channel
            .as_deref()
            .is_none_or(|channel| channel == event.channel);
        let correlation_ok = self
            .correlation_id
            .as_deref()
            .is_none_or(|id| event.correlation_id.as_deref() == Some(id));
        channel_ok && correlation_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: &str, correlation_id: Option<&str>) -> EventResponse {
        EventResponse {
            id: 1,
            channel: channel.to_string(),
            event_type: "test.event".to_string(),
            source: "test".to_string(),
            correlation_id: correlation_id.map(str::to_string),
            payload: serde_json::json!({}),
            created_at: 0,
        }
    }

    #[test]
    fn test_tail_filters() {
        let all = WsTailQuery::default();
        assert!(all.matches(&event("system", None)));

        let by_channel = WsTailQuery {
            channel: Some("parsing:setup".to_string()),
            correlation_id: None,
        };
        assert!(by_channel.matches(&event("parsing:setup", Some("x"))));
        assert!(!by_channel.matches(&event("discord:message", Some("x"))));

        let by_correlation = WsTailQuery {
            channel: None,
            correlation_id: Some("x".to_string()),
        };
        assert!(by_correlation.matches(&event("discord:message", Some("x"))));
        assert!(!by_correlation.matches(&event("discord:message", None)));
    }

    #[test]
    fn test_message_tagging() {
        let json = serde_json::to_value(WsServerMessage::Lagged { skipped: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "lagged", "skipped": 3}));
    }
}
