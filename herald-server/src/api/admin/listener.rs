use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use herald_core::events::ListenerStatus;
use herald_core::events::types::wall_clock;
use herald_sdk::objects::{ListenerStatusResponse, ReplayRequest};

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::AdminApiError;

pub(crate) fn to_response(subscriber: &str, status: &ListenerStatus) -> ListenerStatusResponse {
    ListenerStatusResponse {
        subscriber: subscriber.to_string(),
        state: status.state.into(),
        last_processed_id: status.last_processed_id,
        last_advanced_at: wall_clock(status.last_advanced_at).unix_timestamp(),
        heartbeat_at: wall_clock(status.heartbeat_at).unix_timestamp(),
        lease_generation: status.lease_generation,
        connect_failures: status.connect_failures,
    }
}

/// `GET /listener` - state and watermark of the server's subscriber.
pub async fn listener_status(State(state): State<AppState>, _auth: AdminAuth) -> impl IntoResponse {
    let status = state.bus.status();
    Json(to_response(state.bus.subscriber(), &status))
}

/// `POST /listener/replay` - rewind the watermark to `from_id`.
///
/// Every event with an id greater than `from_id` is dispatched again.
/// Answers once the rewind is durably stored.
pub async fn replay(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(request): Json<ReplayRequest>,
) -> Result<impl IntoResponse, AdminApiError> {
    state.bus.rewind(request.from_id).await?;
    tracing::info!(
        subscriber = state.bus.subscriber(),
        from_id = request.from_id,
        "Operator replay requested"
    );
    Ok(StatusCode::NO_CONTENT)
}
