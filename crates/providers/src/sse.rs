//! SSE decoding for streamed runs.
//!
//! The assistant backend names every event (`event: thread.message.delta`)
//! and carries its payload on `data:` lines. Framing and UTF-8 decoding
//! across chunk boundaries are left to `eventsource-stream`; each event is
//! handed to a parser closure that turns it into [`StreamEvent`]s.

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};

use crate::util::from_reqwest;
use qd_domain::error::{Error, Result};
use qd_domain::stream::{BoxStream, StreamEvent};

/// Build a [`BoxStream`] from an SSE response and a parser closure.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    parse_frame: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(Option<&str>, &str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(from_reqwest));
    sse_event_stream(bytes, parse_frame)
}

/// Decode raw body chunks into stream events.
///
/// The closure receives the event name (`None` for unnamed events) and the
/// data payload and returns zero or more events. Events without data are
/// dropped. A transport or framing error ends the stream; a fallback `Done`
/// is emitted if the parser never produced one.
pub(crate) fn sse_event_stream<S, B, F>(
    body: S,
    mut parse_frame: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: FnMut(Option<&str>, &str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = Box::pin(body.eventsource());
        let mut done_emitted = false;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => {
                    yield Err(e);
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(format!("SSE stream error: {e}")));
                    break;
                }
            };
            if event.data.is_empty() {
                continue;
            }

            let name = Some(event.event.as_str()).filter(|n| !n.is_empty() && *n != "message");
            for parsed in parse_frame(name, &event.data) {
                if matches!(&parsed, Ok(StreamEvent::Done)) {
                    done_emitted = true;
                }
                yield parsed;
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done);
        }
    };

    Box::pin(stream)
}
