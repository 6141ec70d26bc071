pub mod event;
pub mod handler_failure;
pub mod watermark;

use herald_sdk::objects::{EventCountResponse, EventResponse, HandlerFailureResponse};

impl From<event::Event> for EventResponse {
    fn from(value: event::Event) -> Self {
        Self {
            id: value.id,
            channel: value.channel.into_string(),
            event_type: value.event_type.into_string(),
            source: value.source.into_string(),
            correlation_id: value.correlation_id,
            payload: value.payload,
            created_at: value.created_at.unix_timestamp(),
        }
    }
}

impl From<&event::Event> for EventResponse {
    fn from(value: &event::Event) -> Self {
        Self::from(value.clone())
    }
}

impl From<event::EventCount> for EventCountResponse {
    fn from(value: event::EventCount) -> Self {
        Self {
            channel: value.channel,
            event_type: value.event_type,
            count: value.count,
        }
    }
}

impl From<handler_failure::HandlerFailure> for HandlerFailureResponse {
    fn from(value: handler_failure::HandlerFailure) -> Self {
        Self {
            id: value.id,
            event_id: value.event_id,
            subscriber: value.subscriber,
            handler: value.handler,
            error: value.error,
            failed_at: value.failed_at.unix_timestamp(),
        }
    }
}
