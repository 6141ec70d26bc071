//! Read side of the bus.
//!
//! Works directly on the log, independently of any listener. Events removed
//! by retention are simply absent; a flow whose early events were reaped is
//! returned truncated.

use crate::entities::event::{Event, EventCount, EventFilter};
use crate::entities::handler_failure::HandlerFailure;
use crate::store::{Backend, EventStore, StoreError, SubscriberStore};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct QueryService {
    events: Arc<dyn EventStore>,
    subscribers: Arc<dyn SubscriberStore>,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService").finish_non_exhaustive()
    }
}

impl QueryService {
    pub fn new(backend: &Backend) -> Self {
        Self {
            events: backend.events.clone(),
            subscribers: backend.subscribers.clone(),
        }
    }

    /// The newest `limit` events of `channel` created at or after `since`,
    /// returned oldest first.
    pub async fn by_channel(
        &self,
        channel: &str,
        since: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let mut events = self
            .events
            .list(EventFilter {
                channel: Some(channel.to_string()),
                since,
                newest_first: true,
                limit,
                ..EventFilter::default()
            })
            .await?;
        events.reverse();
        Ok(events)
    }

    /// Every retained event of a flow, in id order.
    pub async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
        self.events.by_correlation(correlation_id).await
    }

    pub async fn stats(
        &self,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<EventCount>, StoreError> {
        self.events.count_by_type(since).await
    }

    pub async fn list(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        self.events.list(filter).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Event>, StoreError> {
        self.events.get(id).await
    }

    pub async fn failures(
        &self,
        subscriber: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HandlerFailure>, StoreError> {
        self.subscribers.list_failures(subscriber, limit).await
    }

    pub async fn watermark(&self, subscriber: &str) -> Result<Option<i64>, StoreError> {
        self.subscribers.load_watermark(subscriber).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.events.ping().await
    }
}
