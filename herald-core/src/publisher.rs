//! Durable publish path.
//!
//! A publish is one transactional insert followed by a best-effort wake-up.
//! Once [`Publisher::publish`] returns `Ok` the event is in the log whether
//! or not anybody was listening; a lost wake-up is recovered by the
//! listener's catch-up sweep.

use crate::config::BackoffConfig;
use crate::entities::event::{Event, NewEvent};
use crate::store::{Backend, EventStore, StoreError, WakeupSignal};
use crate::utils::backoff::Backoff;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

pub use crate::entities::event::ValidationError;

/// Identity of a committed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub id: i64,
    pub created_at: OffsetDateTime,
}

impl From<&Event> for Published {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),
    #[error("event store error: {0}")]
    Transient(#[from] StoreError),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Validation(_) => false,
            PublishError::Transient(err) => err.is_transient(),
        }
    }
}

/// Bounded retry for transient publish failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    /// Try exactly once.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::new(Duration::ZERO, Duration::ZERO),
        }
    }

    pub const fn exponential(max_attempts: u32, min: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffConfig::new(min, max),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Clone)]
pub struct Publisher {
    events: Arc<dyn EventStore>,
    signal: Arc<dyn WakeupSignal>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(backend: &Backend) -> Self {
        Self {
            events: backend.events.clone(),
            signal: backend.signal.clone(),
            retry: RetryPolicy::none(),
        }
    }

    /// Policy used by [`publish`](Self::publish) and
    /// [`publish_json`](Self::publish_json).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn publish(&self, event: NewEvent) -> Result<Published, PublishError> {
        self.publish_with_retry(event, &self.retry).await
    }

    /// Publish, retrying transient failures according to `policy`.
    /// Validation failures are returned immediately.
    pub async fn publish_with_retry(
        &self,
        event: NewEvent,
        policy: &RetryPolicy,
    ) -> Result<Published, PublishError> {
        self.publish_event(event, policy)
            .await
            .map(|stored| Published::from(&stored))
    }

    /// Serialize `payload` and publish it. The payload must serialize to a
    /// JSON object.
    pub async fn publish_json<T: serde::Serialize + ?Sized>(
        &self,
        event: NewEvent,
        payload: &T,
    ) -> Result<Published, PublishError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| ValidationError::Serialize(e.to_string()))?;
        self.publish(event.with_payload(payload)).await
    }

    /// Like [`publish_with_retry`](Self::publish_with_retry) but returns the
    /// whole stored row.
    #[tracing::instrument(
        skip_all,
        fields(channel = %event.channel, event_type = %event.event_type),
        err
    )]
    pub async fn publish_event(
        &self,
        event: NewEvent,
        policy: &RetryPolicy,
    ) -> Result<Event, PublishError> {
        event.validate()?;

        let max_attempts = policy.max_attempts.max(1);
        let mut backoff = Backoff::new(policy.backoff);
        let stored = loop {
            match self.events.append(event.clone()).await {
                Ok(stored) => break stored,
                Err(err) if err.is_transient() && backoff.attempts() + 1 < max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %err,
                        attempt = backoff.attempts(),
                        retry_in = ?delay,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        if let Err(err) = self.signal.signal(&stored).await {
            tracing::warn!(
                event_id = stored.id,
                error = %err,
                "Event committed but wake-up signal failed; subscribers will catch up"
            );
        }
        tracing::debug!(event_id = stored.id, "Event published");
        Ok(stored)
    }
}
