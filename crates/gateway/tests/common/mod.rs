//! In-process fakes for the assistant backend and the query executor.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use qd_database::{DatabaseSchema, QueryExecutor};
use qd_domain::assistant::{Run, RunStatus, Thread, ThreadMessage};
use qd_domain::config::Config;
use qd_domain::error::{Error, Result};
use qd_domain::query::{ColumnMeta, QueryRequest, QueryResult};
use qd_domain::stream::{BoxStream, StreamEvent};
use qd_domain::tool::ToolOutput;
use qd_gateway::state::AppState;
use qd_providers::{AssistantBackend, RunRequest};

pub const PENDING_QUERY_ARGS: &str =
    r#"{"query":"SELECT * FROM deliveries WHERE status = :status","parameters":{"status":"pending"}}"#;

// ── Assistant backend ─────────────────────────────────────────────────

#[derive(Default)]
pub struct Calls {
    pub threads_created: usize,
    pub threads_retrieved: Vec<String>,
    pub messages: Vec<(String, String)>,
    pub runs: Vec<RunRequest>,
    pub polls: usize,
    pub submitted: Vec<Vec<ToolOutput>>,
}

pub struct FakeBackend {
    pub calls: Mutex<Calls>,
    /// Status returned by each successive poll.
    statuses: Mutex<VecDeque<RunStatus>>,
    /// Returned once `statuses` runs dry.
    fallback: RunStatus,
    tool_args: String,
    answer: String,
    failure: Option<(String, String)>,
    /// One event list per `stream_run` / `submit_tool_outputs_stream`.
    segments: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Calls::default()),
            statuses: Mutex::new(VecDeque::new()),
            fallback: RunStatus::Completed,
            tool_args: PENDING_QUERY_ARGS.into(),
            answer: "There are 2 pending deliveries.".into(),
            failure: None,
            segments: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_statuses(self, statuses: &[RunStatus]) -> Self {
        *self.statuses.lock() = statuses.iter().copied().collect();
        self
    }

    pub fn with_fallback(mut self, status: RunStatus) -> Self {
        self.fallback = status;
        self
    }

    pub fn with_tool_args(mut self, args: &str) -> Self {
        self.tool_args = args.into();
        self
    }

    pub fn with_failure(mut self, code: &str, message: &str) -> Self {
        self.failure = Some((code.into(), message.into()));
        self
    }

    pub fn with_segments(self, segments: Vec<Vec<StreamEvent>>) -> Self {
        *self.segments.lock() = segments.into();
        self
    }

    pub fn run(&self, status: RunStatus) -> Run {
        let mut body = json!({ "id": "run_1", "thread_id": "thread_1", "status": status });
        if status == RunStatus::RequiresAction {
            body["required_action"] = json!({
                "type": "submit_tool_outputs",
                "submit_tool_outputs": { "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "query_database", "arguments": self.tool_args }
                }]}
            });
        }
        if let Some((code, message)) = &self.failure {
            body["last_error"] = json!({ "code": code, "message": message });
        }
        serde_json::from_value(body).unwrap()
    }

    fn next_segment(&self) -> BoxStream<'static, Result<StreamEvent>> {
        let events = self.segments.lock().pop_front().unwrap_or_default();
        Box::pin(futures_util::stream::iter(events.into_iter().map(Ok)))
    }
}

fn message(id: &str, role: &str, text: &str) -> ThreadMessage {
    serde_json::from_value(json!({
        "id": id,
        "role": role,
        "content": [{ "type": "text", "text": { "value": text, "annotations": [] } }]
    }))
    .unwrap()
}

#[async_trait::async_trait]
impl AssistantBackend for FakeBackend {
    async fn create_thread(&self) -> Result<Thread> {
        let mut calls = self.calls.lock();
        calls.threads_created += 1;
        Ok(Thread {
            id: format!("thread_{}", calls.threads_created),
        })
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread> {
        self.calls.lock().threads_retrieved.push(thread_id.into());
        if thread_id.starts_with("thread_") {
            Ok(Thread {
                id: thread_id.into(),
            })
        } else {
            Err(Error::Provider {
                provider: "fake".into(),
                message: format!("HTTP 404 - No thread found with id '{thread_id}'"),
            })
        }
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<ThreadMessage> {
        self.calls
            .lock()
            .messages
            .push((thread_id.into(), content.into()));
        Ok(message("msg_user", "user", content))
    }

    async fn create_run(&self, _thread_id: &str, req: &RunRequest) -> Result<Run> {
        self.calls.lock().runs.push(req.clone());
        Ok(self.run(RunStatus::Queued))
    }

    async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run> {
        self.calls.lock().polls += 1;
        let status = self.statuses.lock().pop_front().unwrap_or(self.fallback);
        Ok(self.run(status))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        self.calls.lock().submitted.push(outputs.to_vec());
        Ok(self.run(RunStatus::Queued))
    }

    async fn list_messages(&self, _thread_id: &str, _limit: u32) -> Result<Vec<ThreadMessage>> {
        let mut latest = message("msg_2", "assistant", &self.answer);
        // A non-text block ahead of the text must be skipped.
        latest.content.insert(
            0,
            serde_json::from_value(json!({ "type": "image_file", "image_file": { "file_id": "f" } }))
                .unwrap(),
        );
        Ok(vec![
            latest,
            message("msg_1", "user", "show all pending deliveries"),
            message("msg_0", "assistant", "an older answer"),
        ])
    }

    async fn stream_run(
        &self,
        _thread_id: &str,
        req: &RunRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.calls.lock().runs.push(req.clone());
        Ok(self.next_segment())
    }

    async fn submit_tool_outputs_stream(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.calls.lock().submitted.push(outputs.to_vec());
        Ok(self.next_segment())
    }

    fn backend_id(&self) -> &str {
        "fake"
    }
}

// ── Query executor ────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeExecutor {
    pub requests: Mutex<Vec<QueryRequest>>,
    pub fail_with: Option<String>,
}

impl FakeExecutor {
    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        self.requests.lock().push(request.clone());
        if let Some(message) = &self.fail_with {
            return Err(Error::database(&request.statement, message));
        }
        let rows: Vec<_> = ["d-1", "d-2"]
            .iter()
            .map(|id| {
                let mut row = serde_json::Map::new();
                row.insert("delivery_id".into(), json!(id));
                row.insert("status".into(), json!("pending"));
                row
            })
            .collect();
        Ok(QueryResult {
            columns: vec![
                ColumnMeta {
                    name: "delivery_id".into(),
                    type_name: "uuid".into(),
                },
                ColumnMeta {
                    name: "status".into(),
                    type_name: "varchar".into(),
                },
            ],
            row_count: rows.len(),
            rows,
            truncated: false,
        })
    }
}

// ── State ─────────────────────────────────────────────────────────────

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.assistant.assistant_id = "asst_test".into();
    config
}

pub fn state_with(
    config: Config,
    backend: Arc<FakeBackend>,
    executor: Arc<FakeExecutor>,
) -> AppState {
    AppState::new(
        Arc::new(config),
        backend,
        executor,
        &DatabaseSchema::deliveries(),
    )
}
