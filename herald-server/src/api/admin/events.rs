use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use herald_core::entities::event::EventFilter;
use herald_sdk::objects::{
    ChannelEventsQuery, EventCountResponse, EventResponse, ListEventsQuery, StatsQuery,
    clamp_limit, clamp_pagination,
};

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, from_unix};

/// `GET /events` - list events in id order with pagination and optional filters.
pub async fn list_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let (limit, offset) = clamp_pagination(query.limit, query.offset);

    let events = state
        .query
        .list(EventFilter {
            channel: query.channel,
            event_type: query.event_type,
            source: query.source,
            correlation_id: query.correlation_id,
            since: from_unix(query.since)?,
            until: from_unix(query.until)?,
            after_id: query.after_id,
            newest_first: false,
            limit,
            offset,
        })
        .await?;

    let response: Vec<EventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `GET /events/{id}`
pub async fn get_event(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AdminApiError> {
    let event = state.query.get(id).await?.ok_or(AdminApiError::NotFound)?;
    Ok(Json(EventResponse::from(event)))
}

/// `GET /channels/{channel}/events` - the newest `limit` events of a
/// channel, oldest first.
pub async fn channel_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(channel): Path<String>,
    Query(query): Query<ChannelEventsQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let events = state
        .query
        .by_channel(&channel, from_unix(query.since)?, clamp_limit(query.limit))
        .await?;

    let response: Vec<EventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `GET /correlations/{correlation_id}/events` - trace a flow.
///
/// An unknown correlation id yields an empty list, not `404`.
pub async fn correlation_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(correlation_id): Path<String>,
) -> Result<impl IntoResponse, AdminApiError> {
    let events = state.query.by_correlation(&correlation_id).await?;
    let response: Vec<EventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `GET /stats`
pub async fn stats(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let counts = state.query.stats(from_unix(query.since)?).await?;
    let response: Vec<EventCountResponse> = counts.into_iter().map(Into::into).collect();
    Ok(Json(response))
}
