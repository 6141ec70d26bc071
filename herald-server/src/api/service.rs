//! Service API handlers.
//!
//! These endpoints are called by publishing applications and require
//! a signed body verified via the `Herald-Signature` header.
//!
//! # Endpoints
//!
//! - `POST /events` – append an event to the log

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use herald_core::{NewEvent, PublishError};
use herald_sdk::objects::{PublishEventRequest, PublishEventResponse};

use crate::api::extractors::SignedBody;
use crate::state::AppState;

/// Build the Service API router.
pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(publish_event))
}

/// `POST /events` - publish one event.
///
/// Returns `201` once the event is durably stored. The configured
/// `[publish_retry]` policy is applied to transient store failures before
/// answering `503`.
async fn publish_event(
    State(state): State<AppState>,
    SignedBody(request): SignedBody<PublishEventRequest>,
) -> Result<impl IntoResponse, ServiceApiError> {
    let mut event = NewEvent::new(request.channel, request.event_type, request.source)
        .with_payload(request.payload);
    if let Some(correlation_id) = request.correlation_id {
        event = event.with_correlation_id(correlation_id);
    }

    let policy = *state.config.publish_retry.read().await;
    let published = state.publisher.publish_with_retry(event, &policy).await?;

    Ok((
        StatusCode::CREATED,
        Json(PublishEventResponse {
            id: published.id,
            created_at: published.created_at.unix_timestamp(),
        }),
    ))
}

/// Errors that can occur in Service API handlers.
#[derive(Debug)]
enum ServiceApiError {
    Publish(PublishError),
}

impl From<PublishError> for ServiceApiError {
    fn from(value: PublishError) -> Self {
        Self::Publish(value)
    }
}

impl IntoResponse for ServiceApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ServiceApiError::Publish(PublishError::Validation(e)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
            }
            ServiceApiError::Publish(PublishError::Transient(e)) if e.is_transient() => {
                tracing::error!(error = %e, "Service API: publish failed");
                (StatusCode::SERVICE_UNAVAILABLE, "event store unavailable").into_response()
            }
            // Retrying the same request cannot succeed.
            ServiceApiError::Publish(PublishError::Transient(e)) => {
                tracing::error!(error = %e, "Service API: event rejected by the store");
                (StatusCode::INTERNAL_SERVER_ERROR, "event could not be stored").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::store::StoreError;

    fn status(err: PublishError) -> StatusCode {
        ServiceApiError::Publish(err).into_response().status()
    }

    #[test]
    fn test_store_errors_split_by_retryability() {
        assert_eq!(
            status(PublishError::Transient(StoreError::Unavailable("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(PublishError::Transient(StoreError::Database(
                sqlx::Error::RowNotFound
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
