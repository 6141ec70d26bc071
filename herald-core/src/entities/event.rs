use crate::framework::{DatabaseAccessor, DatabaseProcessor, TransactionProcessor};
use compact_str::CompactString;
use kanau::processor::Processor;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Maximum length of `channel`, `event_type` and `source` (column check).
pub const MAX_NAME_LEN: usize = 100;
/// Maximum length of `correlation_id` (column check).
pub const MAX_CORRELATION_ID_LEN: usize = 255;

/// Advisory lock key held by every event insert until its transaction ends.
///
/// Ids come from a sequence at insert time but become visible at commit.
/// Holding this lock from `nextval` to commit makes ids visible in order,
/// so a sweep over `id > watermark` never skips a late committer.
pub const EVENT_APPEND_LOCK: i64 = 0x6865_7261_6c64;

/// Longest age the retention delete hands to Postgres (1000 years).
const MAX_RETENTION_AGE_SECS: i64 = 1000 * 365 * 86_400;

const EVENT_COLUMNS: &str =
    "id, channel, event_type, source, correlation_id, payload, created_at";

/// A durably stored event. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub channel: CompactString,
    pub event_type: CompactString,
    pub source: CompactString,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// An event that has not been written yet.
///
/// `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub channel: CompactString,
    pub event_type: CompactString,
    pub source: CompactString,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Reasons a [`NewEvent`] is rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("payload must be a JSON object, got {0}")]
    PayloadNotObject(&'static str),
    #[error("payload could not be serialized: {0}")]
    Serialize(String),
    #[error("{0} must not contain NUL characters")]
    NulCharacter(&'static str),
}

impl NewEvent {
    /// An event with an empty payload and no correlation id.
    pub fn new(
        channel: impl Into<CompactString>,
        event_type: impl Into<CompactString>,
        source: impl Into<CompactString>,
    ) -> Self {
        Self {
            channel: channel.into(),
            event_type: event_type.into(),
            source: source.into(),
            correlation_id: None,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Mark this event as derived from `parent`, carrying its correlation id
    /// forward unchanged.
    pub fn caused_by(mut self, parent: &Event) -> Self {
        self.correlation_id = parent.correlation_id.clone();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_name("channel", &self.channel)?;
        check_name("event_type", &self.event_type)?;
        check_name("source", &self.source)?;
        if let Some(correlation_id) = &self.correlation_id {
            if correlation_id.trim().is_empty() {
                return Err(ValidationError::Empty("correlation_id"));
            }
            if correlation_id.chars().count() > MAX_CORRELATION_ID_LEN {
                return Err(ValidationError::TooLong {
                    field: "correlation_id",
                    max: MAX_CORRELATION_ID_LEN,
                });
            }
            if correlation_id.contains('\0') {
                return Err(ValidationError::NulCharacter("correlation_id"));
            }
        }
        if !self.payload.is_object() {
            return Err(ValidationError::PayloadNotObject(json_kind(&self.payload)));
        }
        // JSONB cannot store U+0000 anywhere in a document.
        if contains_nul(&self.payload) {
            return Err(ValidationError::NulCharacter("payload"));
        }
        Ok(())
    }

    /// Insert the event inside `tx` and return the stored row.
    ///
    /// Takes [`EVENT_APPEND_LOCK`] first; it is released when `tx` commits or
    /// rolls back, so keep the transaction short.
    #[tracing::instrument(skip_all, err, name = "SQL:InsertEvent")]
    pub async fn insert(self, tx: &mut TransactionProcessor<'_>) -> Result<Event, sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(EVENT_APPEND_LOCK)
            .execute(tx.acquire())
            .await?;

        let sql = format!(
            "INSERT INTO events (channel, event_type, source, correlation_id, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(self.channel)
            .bind(self.event_type)
            .bind(self.source)
            .bind(self.correlation_id)
            .bind(self.payload)
            .fetch_one(tx.acquire())
            .await
    }
}

fn contains_nul(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains('\0'),
        serde_json::Value::Array(items) => items.iter().any(contains_nul),
        serde_json::Value::Object(map) => map
            .iter()
            .any(|(key, value)| key.contains('\0') || contains_nul(value)),
        _ => false,
    }
}

fn check_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_NAME_LEN,
        });
    }
    if value.contains('\0') {
        return Err(ValidationError::NulCharacter(field));
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Read-side filter over the event log. All present fields must match.
///
/// Results are ordered by `id`, ascending unless `newest_first` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub channel: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<OffsetDateTime>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<OffsetDateTime>,
    pub after_id: Option<i64>,
    pub newest_first: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            channel: None,
            event_type: None,
            source: None,
            correlation_id: None,
            since: None,
            until: None,
            after_id: None,
            newest_first: false,
            limit: 100,
            offset: 0,
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        fn eq(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().is_none_or(|e| e == actual)
        }
        eq(&self.channel, &event.channel)
            && eq(&self.event_type, &event.event_type)
            && eq(&self.source, &event.source)
            && self
                .correlation_id
                .as_deref()
                .is_none_or(|c| event.correlation_id.as_deref() == Some(c))
            && self.since.is_none_or(|since| event.created_at >= since)
            && self.until.is_none_or(|until| event.created_at < until)
            && self.after_id.is_none_or(|after| event.id > after)
    }
}

/// Number of events for one (channel, event_type) pair.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EventCount {
    pub channel: String,
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
/// Events with `id > after_id`, oldest first. The catch-up sweep query.
pub struct ListEventsAfter {
    pub after_id: i64,
    pub limit: i64,
}

impl Processor<ListEventsAfter> for DatabaseProcessor {
    type Output = Vec<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListEventsAfter")]
    async fn process(&self, query: ListEventsAfter) -> Result<Vec<Event>, sqlx::Error> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id > $1 ORDER BY id LIMIT $2");
        sqlx::query_as::<_, Event>(&sql)
            .bind(query.after_id)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetEventById {
    pub id: i64,
}

impl Processor<GetEventById> for DatabaseProcessor {
    type Output = Option<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEventById")]
    async fn process(&self, query: GetEventById) -> Result<Option<Event>, sqlx::Error> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        sqlx::query_as::<_, Event>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
/// Highest event id in the store, `None` when the store is empty.
pub struct GetLatestEventId;

impl Processor<GetLatestEventId> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLatestEventId")]
    async fn process(&self, _: GetLatestEventId) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM events")
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Lowest id among events created at or after `since`.
pub struct GetFirstEventIdSince {
    pub since: OffsetDateTime,
}

impl Processor<GetFirstEventIdSince> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetFirstEventIdSince")]
    async fn process(&self, query: GetFirstEventIdSince) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(id) FROM events WHERE created_at >= $1")
            .bind(query.since)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListEvents {
    pub filter: EventFilter,
}

impl Processor<ListEvents> for DatabaseProcessor {
    type Output = Vec<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListEvents")]
    async fn process(&self, query: ListEvents) -> Result<Vec<Event>, sqlx::Error> {
        let filter = query.filter;
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE TRUE"
        ));

        if let Some(channel) = filter.channel {
            builder.push(" AND channel = ").push_bind(channel);
        }
        if let Some(event_type) = filter.event_type {
            builder.push(" AND event_type = ").push_bind(event_type);
        }
        if let Some(source) = filter.source {
            builder.push(" AND source = ").push_bind(source);
        }
        if let Some(correlation_id) = filter.correlation_id {
            builder.push(" AND correlation_id = ").push_bind(correlation_id);
        }
        if let Some(since) = filter.since {
            builder.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            builder.push(" AND created_at < ").push_bind(until);
        }
        if let Some(after_id) = filter.after_id {
            builder.push(" AND id > ").push_bind(after_id);
        }

        builder.push(if filter.newest_first {
            " ORDER BY id DESC"
        } else {
            " ORDER BY id"
        });
        builder.push(" LIMIT ").push_bind(filter.limit);
        builder.push(" OFFSET ").push_bind(filter.offset);

        builder.build_query_as::<Event>().fetch_all(&self.pool).await
    }
}

#[derive(Debug, Clone)]
/// Every retained event of one flow, in causal (`id`) order.
pub struct ListEventsByCorrelation {
    pub correlation_id: String,
}

impl Processor<ListEventsByCorrelation> for DatabaseProcessor {
    type Output = Vec<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListEventsByCorrelation")]
    async fn process(&self, query: ListEventsByCorrelation) -> Result<Vec<Event>, sqlx::Error> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM events WHERE correlation_id = $1 ORDER BY id");
        sqlx::query_as::<_, Event>(&sql)
            .bind(query.correlation_id)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct CountEventsByType {
    pub since: Option<OffsetDateTime>,
}

impl Processor<CountEventsByType> for DatabaseProcessor {
    type Output = Vec<EventCount>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountEventsByType")]
    async fn process(&self, query: CountEventsByType) -> Result<Vec<EventCount>, sqlx::Error> {
        sqlx::query_as::<_, EventCount>(
            r#"
            SELECT channel, event_type, COUNT(*) AS count
            FROM events
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            GROUP BY channel, event_type
            ORDER BY channel, event_type
            "#,
        )
        .bind(query.since)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Bulk retention delete of events older than `max_age`, measured on the
/// database clock (the one that stamped `created_at`). Returns the number of
/// rows removed.
pub struct DeleteEventsOlderThan {
    pub max_age: Duration,
}

impl Processor<DeleteEventsOlderThan> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteEventsOlderThan")]
    async fn process(&self, query: DeleteEventsOlderThan) -> Result<u64, sqlx::Error> {
        let secs = i64::try_from(query.max_age.as_secs())
            .unwrap_or(i64::MAX)
            .min(MAX_RETENTION_AGE_SECS);
        let result = sqlx::query(
            "DELETE FROM events WHERE created_at < now() - make_interval(secs => $1::double precision)",
        )
        .bind(secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> NewEvent {
        NewEvent::new("discord:message", "discord.message.received", "ingest")
            .with_payload(json!({"content": "ETH short 3100"}))
    }

    #[test]
    fn test_valid_event() {
        assert_eq!(event().validate(), Ok(()));
        assert_eq!(event().with_correlation_id("flow-1").validate(), Ok(()));
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut e = event();
        e.channel = CompactString::default();
        assert_eq!(e.validate(), Err(ValidationError::Empty("channel")));

        let mut e = event();
        e.event_type = CompactString::const_new("  ");
        assert_eq!(e.validate(), Err(ValidationError::Empty("event_type")));

        assert_eq!(
            event().with_correlation_id("").validate(),
            Err(ValidationError::Empty("correlation_id"))
        );
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert_eq!(
            event().with_payload(json!([1, 2])).validate(),
            Err(ValidationError::PayloadNotObject("array"))
        );
        assert_eq!(
            event().with_payload(serde_json::Value::Null).validate(),
            Err(ValidationError::PayloadNotObject("null"))
        );
    }

    #[test]
    fn test_nul_characters_rejected() {
        assert_eq!(
            event()
                .with_payload(json!({"content": "a\u{0}b"}))
                .validate(),
            Err(ValidationError::NulCharacter("payload"))
        );
        assert_eq!(
            event()
                .with_payload(json!({"nested": [{"k\u{0}": 1}]}))
                .validate(),
            Err(ValidationError::NulCharacter("payload"))
        );
        assert_eq!(
            event().with_correlation_id("flow\u{0}1").validate(),
            Err(ValidationError::NulCharacter("correlation_id"))
        );
        let mut e = event();
        e.source = "ingest\0".into();
        assert_eq!(e.validate(), Err(ValidationError::NulCharacter("source")));
    }

    #[test]
    fn test_overlong_channel_rejected() {
        let mut e = event();
        e.channel = "x".repeat(MAX_NAME_LEN + 1).into();
        assert_eq!(
            e.validate(),
            Err(ValidationError::TooLong {
                field: "channel",
                max: MAX_NAME_LEN
            })
        );
    }

    #[test]
    fn test_caused_by_propagates_correlation() {
        let parent = Event {
            id: 7,
            channel: "discord:message".into(),
            event_type: "discord.message.received".into(),
            source: "ingest".into(),
            correlation_id: Some("flow-9".to_string()),
            payload: json!({}),
            created_at: OffsetDateTime::now_utc(),
        };
        let child = NewEvent::new("parsing:setup", "parsing.setup.extracted", "parser")
            .caused_by(&parent);
        assert_eq!(child.correlation_id.as_deref(), Some("flow-9"));
    }

    #[test]
    fn test_filter_matching() {
        let now = OffsetDateTime::now_utc();
        let stored = Event {
            id: 10,
            channel: "parsing:setup".into(),
            event_type: "parsing.setup.extracted".into(),
            source: "parser".into(),
            correlation_id: Some("x".to_string()),
            payload: json!({}),
            created_at: now,
        };

        assert!(EventFilter::default().matches(&stored));
        let by_channel = EventFilter {
            channel: Some("parsing:setup".to_string()),
            ..EventFilter::default()
        };
        assert!(by_channel.matches(&stored));
        let after = EventFilter {
            after_id: Some(10),
            ..EventFilter::default()
        };
        assert!(!after.matches(&stored));
        let window = EventFilter {
            since: Some(now),
            until: Some(now),
            ..EventFilter::default()
        };
        assert!(!window.matches(&stored));
    }
}
