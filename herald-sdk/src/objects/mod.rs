//! Request and response bodies exchanged with a Herald server.

pub mod event;
pub mod listener;
pub mod publish;
pub mod query;
pub mod ws;

pub use event::{EventResponse, EventCountResponse, HandlerFailureResponse};
pub use listener::{ListenerStateName, ListenerStatusResponse, ReplayRequest};
pub use publish::{PublishEventRequest, PublishEventResponse};
pub use query::{
    ChannelEventsQuery, FailuresQuery, ListEventsQuery, StatsQuery, clamp_limit, clamp_pagination,
};

/// Marker trait for request bodies that can be HMAC-signed with
/// [`SignedObject`](crate::signature::SignedObject).
pub use crate::signature::Signature;
