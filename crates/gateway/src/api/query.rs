//! `POST /query`: the public direct-query path.
//!
//! No authentication. Statements pass the `database.guard.query_endpoint`
//! guard before reaching the executor.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use qd_domain::error::Error;
use qd_domain::query::{QueryParams, QueryRequest};

use super::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    /// Object for `:name` placeholders, array for `$n` markers.
    #[serde(default)]
    pub params: Option<QueryParams>,
}

pub async fn run_query(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid request", rejection.body_text())
        }
    };

    if let Err(e) = state.public_guard.validate(&body.query) {
        tracing::warn!(error = %e, "public query rejected");
        return error_response(StatusCode::BAD_REQUEST, "Query rejected", e);
    }

    let request = QueryRequest {
        statement: body.query,
        params: body.params.unwrap_or_default(),
    };

    match state.executor.execute(&request).await {
        Ok(result) => {
            tracing::debug!(rows = result.row_count, "public query executed");
            Json(serde_json::json!({ "data": result.rows })).into_response()
        }
        Err(e @ Error::Validation(_)) => error_response(StatusCode::BAD_REQUEST, "Query rejected", e),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind(), "public query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to execute query", e)
        }
    }
}
