//! SSE detection event stream handler.

use crate::AppState;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{stream, Stream};
use std::{convert::Infallible, sync::Arc};

/// Handler for `GET /events`.
///
/// Registers a subscriber and streams one `data:` frame per detection. When
/// the client disconnects the stream is dropped, which unregisters the
/// subscriber. If the subscriber is evicted for not keeping up, the stream
/// ends after its buffered events.
pub async fn get_event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = state.broadcaster.subscribe();
    tracing::debug!(subscriber = %subscriber.id(), "event stream opened");

    let events = stream::unfold(subscriber, |mut subscriber| async move {
        let message = subscriber.recv().await?;
        Some((Ok(Event::default().data(&*message)), subscriber))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
