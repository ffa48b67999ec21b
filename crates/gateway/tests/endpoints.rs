mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use qd_domain::assistant::RunStatus;
use qd_domain::config::ChatMode;
use qd_gateway::api;
use qd_gateway::runtime::{prepare_thread, run_turn, TurnInput};
use qd_gateway::state::AppState;

use common::{state_with, test_config, FakeBackend, FakeExecutor};

fn default_state() -> (AppState, Arc<FakeExecutor>) {
    let executor = Arc::new(FakeExecutor::default());
    let state = state_with(test_config(), Arc::new(FakeBackend::new()), executor.clone());
    (state, executor)
}

async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = api::router()
        .with_state(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn event_type(frame: &str) -> String {
    let v: Value = serde_json::from_str(frame).unwrap();
    v["type"].as_str().unwrap().to_string()
}

// ── /query ────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_select_returns_rows() {
    let (state, executor) = default_state();
    let (status, body) = post_json(
        &state,
        "/query",
        json!({ "query": "SELECT * FROM deliveries WHERE status = :status", "params": { "status": "pending" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["delivery_id"], "d-1");
    assert_eq!(executor.requests.lock().len(), 1);
}

#[tokio::test]
async fn direct_drop_is_rejected_before_execution() {
    let (state, executor) = default_state();
    let (status, body) = post_json(&state, "/api/query", json!({ "query": "DROP TABLE deliveries" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Query rejected");
    assert!(body["details"].is_string());
    assert!(executor.requests.lock().is_empty());
}

#[tokio::test]
async fn direct_query_database_failure_is_500() {
    let executor = Arc::new(FakeExecutor::failing("connection refused"));
    let state = state_with(test_config(), Arc::new(FakeBackend::new()), executor);
    let (status, body) = post_json(&state, "/query", json!({ "query": "SELECT 1" })).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to execute query");
    assert!(body["details"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn direct_query_requires_a_statement() {
    let (state, _) = default_state();
    let (status, body) = post_json(&state, "/query", json!({ "params": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");
}

// ── /chat thread handle ───────────────────────────────────────────────

#[tokio::test]
async fn path_shaped_thread_id_is_rejected_before_the_backend() {
    let backend = Arc::new(FakeBackend::new());
    let state = state_with(test_config(), backend.clone(), Arc::new(FakeExecutor::default()));

    for thread_id in ["thread_1/../../assistants", "../assistants", "thread_1?limit=100"] {
        let (status, body) = post_json(
            &state,
            "/chat",
            json!({ "message": "hi", "threadId": thread_id }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{thread_id}");
        assert_eq!(body["error"], "Invalid request");
        assert!(body["details"].as_str().unwrap().contains("invalid thread id"));
    }

    let calls = backend.calls.lock();
    assert!(calls.threads_retrieved.is_empty());
    assert_eq!(calls.threads_created, 0);
    assert!(calls.messages.is_empty());
}

// ── /health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_backend_and_counts() {
    let (state, _) = default_state();
    let response = api::router()
        .with_state(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "fake");
    assert_eq!(body["listeners"], 0);
    assert!(body["pool"].is_null());
}

// ── /status ───────────────────────────────────────────────────────────

#[tokio::test]
async fn status_stream_opens_with_connected_event() {
    let (state, _) = default_state();
    let response = api::router()
        .with_state(state.clone())
        .oneshot(Request::builder().uri("/api/chat/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"type\":\"connected\""));
    assert!(text.contains("\"clients\":1"));
    assert_eq!(state.status.listener_count(), 1);

    drop(frames);
    assert_eq!(state.status.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn listeners_see_the_turn_progress_in_order() {
    let backend = Arc::new(FakeBackend::new().with_statuses(&[
        RunStatus::RequiresAction,
        RunStatus::Completed,
    ]));
    let state = state_with(test_config(), backend, Arc::new(FakeExecutor::default()));

    let mut first = state.status.subscribe();
    let mut second = state.status.subscribe();

    let thread = prepare_thread(&state, None).await.unwrap();
    let permit = state.thread_locks.acquire(&thread.id).await.unwrap();
    let mut rx = run_turn(
        state.clone(),
        TurnInput {
            thread_id: thread.id,
            message: "show all pending deliveries".into(),
            mode: ChatMode::Polling,
        },
        permit,
    );
    while rx.recv().await.is_some() {}

    let mut kinds = Vec::new();
    for _ in 0..5 {
        kinds.push(event_type(&first.recv().await.unwrap()));
    }
    assert_eq!(
        kinds,
        vec!["connected", "thinking", "querying", "results", "complete"]
    );

    // Each listener gets the full sequence; its connect saw both listeners.
    let connected: Value = serde_json::from_str(&second.recv().await.unwrap()).unwrap();
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["clients"], 2);
    let querying: Value = {
        assert_eq!(event_type(&second.recv().await.unwrap()), "thinking");
        serde_json::from_str(&second.recv().await.unwrap()).unwrap()
    };
    assert_eq!(querying["type"], "querying");
    assert!(querying["query"].as_str().unwrap().contains("deliveries"));
    assert_eq!(querying["parameters"]["status"], "pending");
}

#[tokio::test]
async fn late_listener_gets_no_replay() {
    let (state, _) = default_state();
    state
        .status
        .publish(&qd_domain::status::StatusEvent::thinking("Processing your request"));

    let mut late = state.status.subscribe();
    assert_eq!(event_type(&late.recv().await.unwrap()), "connected");
    state
        .status
        .publish(&qd_domain::status::StatusEvent::complete("Response ready"));
    assert_eq!(event_type(&late.recv().await.unwrap()), "complete");
}
