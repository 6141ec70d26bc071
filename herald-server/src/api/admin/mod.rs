//! Admin API handlers.
//!
//! These endpoints are called by operators and dashboards and require
//! the `Herald-Admin-Authorization` header with the plaintext admin secret.
//!
//! # Endpoints
//!
//! - `GET  /events`                                 – list events (paginated, filterable)
//! - `GET  /events/{id}`                            – one event
//! - `GET  /events/ws`                              – live tail (WebSocket)
//! - `GET  /channels/{channel}/events`              – recent events of a channel
//! - `GET  /correlations/{correlation_id}/events`   – every event of a flow
//! - `GET  /stats`                                  – event counts per channel and type
//! - `GET  /failures`                               – recorded handler failures
//! - `GET  /listener`                               – status of the server's subscriber
//! - `POST /listener/replay`                        – rewind the server's subscriber

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use herald_core::BusError;
use herald_core::store::StoreError;
use time::OffsetDateTime;

use crate::state::AppState;

mod events;
mod failures;
mod listener;
mod tail;

/// Build the Admin API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(events::list_events))
        .route("/events/ws", get(tail::tail_events))
        .route("/events/{id}", get(events::get_event))
        .route("/channels/{channel}/events", get(events::channel_events))
        .route(
            "/correlations/{correlation_id}/events",
            get(events::correlation_events),
        )
        .route("/stats", get(events::stats))
        .route("/failures", get(failures::list_failures))
        .route("/listener", get(listener::listener_status))
        .route("/listener/replay", post(listener::replay))
}

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

/// Errors that can occur in Admin API handlers.
#[derive(Debug)]
pub(crate) enum AdminApiError {
    Store(StoreError),
    NotFound,
    InvalidTimestamp(i64),
    Bus(BusError),
}

impl From<StoreError> for AdminApiError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<BusError> for AdminApiError {
    fn from(value: BusError) -> Self {
        Self::Bus(value)
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AdminApiError::Store(e) => {
                tracing::error!(error = %e, "Admin API store error");
                let status = if e.is_transient() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, "event store error").into_response()
            }
            AdminApiError::NotFound => {
                (StatusCode::NOT_FOUND, "resource not found").into_response()
            }
            AdminApiError::InvalidTimestamp(ts) => (
                StatusCode::BAD_REQUEST,
                format!("invalid unix timestamp {ts}"),
            )
                .into_response(),
            AdminApiError::Bus(BusError::InvalidReplay(id)) => (
                StatusCode::BAD_REQUEST,
                format!("invalid replay position {id}"),
            )
                .into_response(),
            AdminApiError::Bus(BusError::ListenerStopped) => {
                (StatusCode::CONFLICT, "the listener is not running").into_response()
            }
            AdminApiError::Bus(e) => {
                tracing::error!(error = %e, "Admin API bus error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

pub(crate) fn from_unix(ts: Option<i64>) -> Result<Option<OffsetDateTime>, AdminApiError> {
    ts.map(|ts| {
        OffsetDateTime::from_unix_timestamp(ts).map_err(|_| AdminApiError::InvalidTimestamp(ts))
    })
    .transpose()
}
