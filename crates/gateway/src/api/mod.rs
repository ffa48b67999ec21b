pub mod chat;
pub mod health;
pub mod query;
pub mod status;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
///
/// Every route is also reachable under its `/api/...` alias, which is
/// where the browser UI expects them.
pub fn router() -> Router<AppState> {
    Router::new()
        // Chat (core runtime)
        .route("/chat", post(chat::chat))
        .route("/api/chat", post(chat::chat))
        // Status push channel
        .route("/status", get(status::status_events))
        .route("/api/chat/status", get(status::status_events))
        // Direct query path
        .route("/query", post(query::run_query))
        .route("/api/query", post(query::run_query))
        // Health
        .route("/health", get(health::health))
        .route("/api/health", get(health::health))
}

/// `{error, details}` body with the given status. Never carries more than
/// the error's message.
pub(crate) fn error_response(
    status: StatusCode,
    error: &str,
    details: impl std::fmt::Display,
) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "details": details.to_string(),
        })),
    )
        .into_response()
}
