use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// Durable record of a handler that returned an error (or panicked) for an
/// event. Removed together with the event by retention.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HandlerFailure {
    pub id: i64,
    pub event_id: i64,
    pub subscriber: String,
    pub handler: String,
    pub error: String,
    pub failed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct RecordHandlerFailure {
    pub event_id: i64,
    pub subscriber: String,
    pub handler: String,
    pub error: String,
}

impl Processor<RecordHandlerFailure> for DatabaseProcessor {
    type Output = HandlerFailure;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordHandlerFailure")]
    async fn process(&self, req: RecordHandlerFailure) -> Result<HandlerFailure, sqlx::Error> {
        sqlx::query_as::<_, HandlerFailure>(
            r#"
            INSERT INTO event_handler_failures (event_id, subscriber, handler, error)
            VALUES ($1, $2, $3, $4)
            RETURNING id, event_id, subscriber, handler, error, failed_at
            "#,
        )
        .bind(req.event_id)
        .bind(req.subscriber)
        .bind(req.handler)
        .bind(req.error)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Most recent failures first.
pub struct ListHandlerFailures {
    pub subscriber: Option<String>,
    pub limit: i64,
}

impl Processor<ListHandlerFailures> for DatabaseProcessor {
    type Output = Vec<HandlerFailure>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListHandlerFailures")]
    async fn process(&self, query: ListHandlerFailures) -> Result<Vec<HandlerFailure>, sqlx::Error> {
        sqlx::query_as::<_, HandlerFailure>(
            r#"
            SELECT id, event_id, subscriber, handler, error, failed_at
            FROM event_handler_failures
            WHERE $1::varchar IS NULL OR subscriber = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(query.subscriber)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}
