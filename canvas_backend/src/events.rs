use crate::{
    AppState,
    handlers::{AppError, room_id},
};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use tracing::info;

/// Server-sent event stream of a room's notifications.
///
/// Each notification becomes one `data: <json>` event. The listener is
/// registered before the response starts and removed when the client
/// goes away and the stream is dropped.
pub async fn room_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let id = room_id(id)?;
    let subscription = state
        .registry
        .listen(&id, state.config.listener_buffer)
        .await;
    let listeners = state.registry.listener_count(&id).await;
    info!(room = %id, listener = %subscription.listener(), listeners, "New event stream");

    let stream = subscription.map(|notification| Event::default().json_data(notification));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.keep_alive)))
}
