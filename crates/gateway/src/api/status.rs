//! `GET /status`: server-push channel of status events.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;

use crate::state::AppState;

/// Each event is one `data: <json>` frame. The listener is unregistered
/// when the client goes away and the stream is dropped.
pub async fn status_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut subscription = state.status.subscribe();

    let stream = async_stream::stream! {
        while let Some(frame) = subscription.recv().await {
            yield Ok(Event::default().data(&*frame));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
