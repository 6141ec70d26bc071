use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// Highest event id a durable subscriber has finished dispatching.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SubscriberWatermark {
    pub subscriber: String,
    pub last_processed_id: i64,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct GetSubscriberWatermark {
    pub subscriber: String,
}

impl Processor<GetSubscriberWatermark> for DatabaseProcessor {
    type Output = Option<SubscriberWatermark>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscriberWatermark")]
    async fn process(
        &self,
        query: GetSubscriberWatermark,
    ) -> Result<Option<SubscriberWatermark>, sqlx::Error> {
        sqlx::query_as::<_, SubscriberWatermark>(
            r#"
            SELECT subscriber, last_processed_id, updated_at
            FROM event_subscriber_watermarks
            WHERE subscriber = $1
            "#,
        )
        .bind(query.subscriber)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Move the watermark forward. A value at or below the stored one is a no-op,
/// so a slow writer can never drag the watermark back.
pub struct AdvanceSubscriberWatermark {
    pub subscriber: String,
    pub last_processed_id: i64,
}

impl Processor<AdvanceSubscriberWatermark> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AdvanceSubscriberWatermark")]
    async fn process(&self, query: AdvanceSubscriberWatermark) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO event_subscriber_watermarks (subscriber, last_processed_id, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (subscriber) DO UPDATE
            SET last_processed_id = EXCLUDED.last_processed_id,
                updated_at = EXCLUDED.updated_at
            WHERE event_subscriber_watermarks.last_processed_id < EXCLUDED.last_processed_id
            "#,
        )
        .bind(query.subscriber)
        .bind(query.last_processed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Overwrite the watermark unconditionally. Used for operator replays.
pub struct RewindSubscriberWatermark {
    pub subscriber: String,
    pub last_processed_id: i64,
}

impl Processor<RewindSubscriberWatermark> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RewindSubscriberWatermark")]
    async fn process(&self, query: RewindSubscriberWatermark) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO event_subscriber_watermarks (subscriber, last_processed_id, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (subscriber) DO UPDATE
            SET last_processed_id = EXCLUDED.last_processed_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(query.subscriber)
        .bind(query.last_processed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
