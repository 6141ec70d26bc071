use super::{
    EventStore, StoreError, SubscriberStore, Wakeup, WakeupLease, WakeupSignal, WakeupSource,
};
use crate::entities::event::{
    CountEventsByType, DeleteEventsOlderThan, Event, EventCount, EventFilter,
    GetEventById, GetFirstEventIdSince, GetLatestEventId, ListEvents, ListEventsAfter,
    ListEventsByCorrelation, NewEvent,
};
use crate::entities::handler_failure::{HandlerFailure, ListHandlerFailures, RecordHandlerFailure};
use crate::entities::watermark::{
    AdvanceSubscriberWatermark, GetSubscriberWatermark, RewindSubscriberWatermark,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use compact_str::CompactString;
use kanau::processor::Processor;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use time::OffsetDateTime;

/// [`EventStore`] and [`SubscriberStore`] over the `events`,
/// `event_subscriber_watermarks` and `event_handler_failures` tables.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    db: DatabaseProcessor,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let mut tx = self.db.begin().await?;
        let stored = event.insert(&mut tx).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<Event>, StoreError> {
        Ok(self.db.process(ListEventsAfter { after_id, limit }).await?)
    }

    async fn get(&self, id: i64) -> Result<Option<Event>, StoreError> {
        Ok(self.db.process(GetEventById { id }).await?)
    }

    async fn latest_event_id(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.db.process(GetLatestEventId).await?)
    }

    async fn first_event_id_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self.db.process(GetFirstEventIdSince { since }).await?)
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        Ok(self.db.process(ListEvents { filter }).await?)
    }

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .db
            .process(ListEventsByCorrelation {
                correlation_id: correlation_id.to_string(),
            })
            .await?)
    }

    async fn count_by_type(
        &self,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<EventCount>, StoreError> {
        Ok(self.db.process(CountEventsByType { since }).await?)
    }

    async fn delete_older_than(&self, max_age: Duration) -> Result<u64, StoreError> {
        Ok(self.db.process(DeleteEventsOlderThan { max_age }).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:Ping")]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for PgEventStore {
    async fn load_watermark(&self, subscriber: &str) -> Result<Option<i64>, StoreError> {
        let row = self
            .db
            .process(GetSubscriberWatermark {
                subscriber: subscriber.to_string(),
            })
            .await?;
        Ok(row.map(|w| w.last_processed_id))
    }

    async fn advance_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(AdvanceSubscriberWatermark {
                subscriber: subscriber.to_string(),
                last_processed_id,
            })
            .await?)
    }

    async fn rewind_watermark(
        &self,
        subscriber: &str,
        last_processed_id: i64,
    ) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(RewindSubscriberWatermark {
                subscriber: subscriber.to_string(),
                last_processed_id,
            })
            .await?)
    }

    async fn record_failure(&self, failure: RecordHandlerFailure) -> Result<(), StoreError> {
        self.db.process(failure).await?;
        Ok(())
    }

    async fn list_failures(
        &self,
        subscriber: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HandlerFailure>, StoreError> {
        Ok(self
            .db
            .process(ListHandlerFailures {
                subscriber: subscriber.map(str::to_string),
                limit,
            })
            .await?)
    }
}

#[derive(Debug, Clone)]
/// `SELECT pg_notify(channel, id)`. Delivered to every session currently
/// listening on `channel`; dropped otherwise.
pub struct NotifyEventCommitted {
    pub channel: CompactString,
    pub event_id: i64,
}

impl Processor<NotifyEventCommitted> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:NotifyEventCommitted")]
    async fn process(&self, req: NotifyEventCommitted) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(req.channel.as_str())
            .bind(req.event_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Wake-ups over Postgres `LISTEN/NOTIFY`. The payload of each notification
/// is the decimal id of the committed event.
#[derive(Debug, Clone)]
pub struct PgWakeups {
    db: DatabaseProcessor,
    channel: CompactString,
}

impl PgWakeups {
    pub fn new(pool: PgPool, channel: &str) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            channel: CompactString::from(channel),
        }
    }
}

#[async_trait]
impl WakeupSource for PgWakeups {
    async fn connect(&self) -> Result<Box<dyn WakeupLease>, StoreError> {
        let mut listener = PgListener::connect_with(&self.db.pool).await?;
        listener.listen(&self.channel).await?;
        tracing::debug!(channel = %self.channel, "Listening for wake-ups");
        Ok(Box::new(PgWakeupLease { listener }))
    }
}

#[async_trait]
impl WakeupSignal for PgWakeups {
    async fn signal(&self, event: &Event) -> Result<(), StoreError> {
        self.db
            .process(NotifyEventCommitted {
                channel: self.channel.clone(),
                event_id: event.id,
            })
            .await?;
        Ok(())
    }
}

struct PgWakeupLease {
    listener: PgListener,
}

#[async_trait]
impl WakeupLease for PgWakeupLease {
    async fn recv(&mut self) -> Result<Wakeup, StoreError> {
        // `try_recv` yields `None` exactly once per dropped connection; any
        // notification sent while it was down is gone.
        match self.listener.try_recv().await? {
            Some(notification) => Ok(Wakeup {
                event_id: notification.payload().parse().ok(),
            }),
            None => Err(StoreError::SignalLost),
        }
    }
}
