//! `POST /chat`: one user turn.
//!
//! Polling mode answers with `{message, threadId}` once the run is done.
//! Streaming mode answers immediately with a plain-text body that grows as
//! the reply arrives; the thread id travels in `X-Thread-ID`.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::sync::mpsc;

use qd_domain::config::ChatMode;
use qd_domain::error::Error;

use super::error_response;
use crate::runtime::{prepare_thread, run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

const FAILED: &str = "Failed to process request";

pub static THREAD_ID_HEADER: HeaderName = HeaderName::from_static("x-thread-id");

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, rename = "threadId", alias = "thread_id")]
    pub thread_id: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid request", rejection.body_text())
        }
    };
    if body.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request", "message must not be empty");
    }

    let thread = match prepare_thread(&state, body.thread_id.as_deref()).await {
        Ok(t) => t,
        Err(e @ Error::Validation(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid request", e);
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve thread");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, FAILED, e);
        }
    };

    let permit = match state.thread_locks.acquire(&thread.id).await {
        Ok(p) => p,
        Err(busy) => return error_response(StatusCode::CONFLICT, FAILED, busy),
    };

    let mode = state.config.chat.mode;
    let input = TurnInput {
        thread_id: thread.id.clone(),
        message: body.message,
        mode,
    };
    let rx = run_turn(state.clone(), input, permit);

    match mode {
        ChatMode::Polling => collect_reply(rx, thread.id).await,
        ChatMode::Streaming => stream_reply(rx, thread.id),
    }
}

// ── Polling: one JSON reply ───────────────────────────────────────────

async fn collect_reply(mut rx: mpsc::Receiver<TurnEvent>, thread_id: String) -> Response {
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Final { content } => {
                return Json(serde_json::json!({
                    "message": content,
                    "threadId": thread_id,
                }))
                .into_response();
            }
            TurnEvent::Error { message, .. } => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, FAILED, message);
            }
            _ => {}
        }
    }
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        FAILED,
        "turn ended without a reply",
    )
}

// ── Streaming: plain-text body ────────────────────────────────────────

fn stream_reply(mut rx: mpsc::Receiver<TurnEvent>, thread_id: String) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::AssistantDelta { text } => yield Ok::<_, Infallible>(Bytes::from(text)),
                TurnEvent::Error { message, .. } => yield Ok(Bytes::from(format!("\nError: {message}\n"))),
                _ => {}
            }
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (THREAD_ID_HEADER.clone(), thread_id),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
