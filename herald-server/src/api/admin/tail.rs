use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use herald_sdk::objects::EventResponse;
use herald_sdk::objects::ws::{WsServerMessage, WsTailQuery};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

/// `GET /events/ws` - live tail of dispatched events.
///
/// Forwards every event the server's subscriber dispatches that passes the
/// optional `channel` / `correlation_id` filters. A slow client receives a
/// `lagged` frame instead of the events it missed.
pub async fn tail_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(filter): Query<WsTailQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before the upgrade so nothing dispatched in between is lost.
    let feed = state.live_feed.subscribe();
    ws.on_upgrade(move |socket| relay_events(socket, feed, filter))
}

async fn relay_events(
    mut socket: WebSocket,
    mut feed: broadcast::Receiver<EventResponse>,
    filter: WsTailQuery,
) {
    loop {
        tokio::select! {
            result = feed.recv() => {
                let msg = match result {
                    Ok(event) if filter.matches(&event) => WsServerMessage::Event { event },
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WS: live tail lagged");
                        WsServerMessage::Lagged { skipped }
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_json(&mut socket, &msg).await.is_err() {
                    return;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
