use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use herald_sdk::objects::{FailuresQuery, HandlerFailureResponse, clamp_limit};

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::AdminApiError;

/// `GET /failures` - most recent handler failures first, optionally for
/// one subscriber only.
pub async fn list_failures(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<FailuresQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let failures = state
        .query
        .failures(query.subscriber.as_deref(), clamp_limit(query.limit))
        .await?;

    let response: Vec<HandlerFailureResponse> = failures.into_iter().map(Into::into).collect();
    Ok(Json(response))
}
