//! Diagnostic events the bus publishes about itself.
//!
//! All of them go to [`SYSTEM_CHANNEL`]. A diagnostic about a specific
//! event carries that event's correlation id so it shows up when the flow
//! is traced.

use crate::entities::event::{Event, NewEvent};
use serde_json::json;

pub const SYSTEM_CHANNEL: &str = "system";

pub const HANDLER_FAILED: &str = "system.handler.failed";
pub const LISTENER_RESTART_FORCED: &str = "system.listener.restart_forced";
pub const WATCHDOG_GAVE_UP: &str = "system.watchdog.gave_up";

const LISTENER_SOURCE: &str = "herald.listener";
const WATCHDOG_SOURCE: &str = "herald.watchdog";

pub fn is_system(event: &Event) -> bool {
    event.channel == SYSTEM_CHANNEL
}

pub fn handler_failed(subscriber: &str, event: &Event, handler: &str, error: &str) -> NewEvent {
    let diagnostic = NewEvent::new(SYSTEM_CHANNEL, HANDLER_FAILED, LISTENER_SOURCE)
        .with_payload(json!({
            "subscriber": subscriber,
            "event_id": event.id,
            "channel": event.channel,
            "event_type": event.event_type,
            "handler": handler,
            "error": error,
        }));
    diagnostic.caused_by(event)
}

pub fn restart_forced(subscriber: &str, reason: &str, consecutive_restarts: u32) -> NewEvent {
    NewEvent::new(SYSTEM_CHANNEL, LISTENER_RESTART_FORCED, WATCHDOG_SOURCE).with_payload(json!({
        "subscriber": subscriber,
        "reason": reason,
        "consecutive_restarts": consecutive_restarts,
    }))
}

pub fn watchdog_gave_up(subscriber: &str, consecutive_restarts: u32) -> NewEvent {
    NewEvent::new(SYSTEM_CHANNEL, WATCHDOG_GAVE_UP, WATCHDOG_SOURCE).with_payload(json!({
        "subscriber": subscriber,
        "consecutive_restarts": consecutive_restarts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_handler_failed_references_event() {
        let event = Event {
            id: 7,
            channel: "parsing:setup".into(),
            event_type: "parsing.setup.extracted".into(),
            source: "parser".into(),
            correlation_id: Some("flow-7".to_string()),
            payload: json!({}),
            created_at: OffsetDateTime::now_utc(),
        };
        let diagnostic = handler_failed("default", &event, "risk-check", "timeout");
        assert_eq!(diagnostic.channel, SYSTEM_CHANNEL);
        assert_eq!(diagnostic.event_type, HANDLER_FAILED);
        assert_eq!(diagnostic.correlation_id.as_deref(), Some("flow-7"));
        assert_eq!(diagnostic.payload["event_id"], 7);
        assert_eq!(diagnostic.validate(), Ok(()));
        assert!(!is_system(&event));
    }
}
