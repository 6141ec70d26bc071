//! Application state shared across all request handlers.

use crate::config::runtime::SharedConfig;
use herald_core::bus::BusControl;
use herald_core::{HandlerRegistry, Publisher, QueryService, handler_fn};
use herald_sdk::objects::EventResponse;
use tokio::sync::broadcast;

/// Events buffered per live-tail connection before it is told it lagged.
const LIVE_FEED_CAPACITY: usize = 1024;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration (can be reloaded via SIGHUP).
    pub config: SharedConfig,
    pub publisher: Publisher,
    pub query: QueryService,
    /// Control surface of the server's own subscriber.
    pub bus: BusControl,
    /// Every event the server's subscriber dispatches, for `GET /events/ws`.
    pub live_feed: broadcast::Sender<EventResponse>,
}

impl AppState {
    pub fn new(
        config: SharedConfig,
        publisher: Publisher,
        query: QueryService,
        bus: BusControl,
        live_feed: broadcast::Sender<EventResponse>,
    ) -> Self {
        Self {
            config,
            publisher,
            query,
            bus,
            live_feed,
        }
    }
}

/// Create the live-tail broadcast channel.
pub fn live_feed_channel() -> broadcast::Sender<EventResponse> {
    broadcast::channel(LIVE_FEED_CAPACITY).0
}

/// Handlers run by the server's own subscriber: every dispatched event is
/// fanned out to the connected live-tail sockets.
pub fn server_handlers(live_feed: broadcast::Sender<EventResponse>) -> HandlerRegistry {
    HandlerRegistry::new().on_all(handler_fn("live-feed", move |event| {
        let live_feed = live_feed.clone();
        async move {
            // No connected tail is not an error.
            let _ = live_feed.send(EventResponse::from(event));
            Ok(())
        }
    }))
}
