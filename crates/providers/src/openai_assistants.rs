//! OpenAI Assistants v2 adapter.
//!
//! Threads, messages, and runs live on the backend; this adapter only
//! translates between the domain types and the REST + SSE wire format.

use crate::traits::{AssistantBackend, RunRequest};
use crate::util::{from_reqwest, path_id, resolve_api_key};
use qd_domain::assistant::{Run, RunStatus, Thread, ThreadMessage};
use qd_domain::config::AssistantConfig;
use qd_domain::error::{Error, Result};
use qd_domain::stream::{BoxStream, StreamEvent, ToolCallDelta};
use qd_domain::tool::{ToolDefinition, ToolOutput};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiAssistants {
    id: String,
    base_url: String,
    api_key: String,
    /// Per-request timeout for non-streaming calls.
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiAssistants {
    /// Build the adapter from config, resolving the API key.
    pub fn from_config(cfg: &AssistantConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        Self::new(&cfg.base_url, api_key, Duration::from_millis(cfg.timeout_ms))
    }

    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        // No overall client timeout: streamed runs can outlive any fixed
        // budget. Non-streaming calls set one per request.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "openai-assistants".into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client,
        })
    }

    // ── Internal: authenticated request builders ──────────────────

    fn authed(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .header("Content-Type", "application/json")
    }

    /// Send a request and decode the JSON body, mapping non-2xx to
    /// [`Error::Provider`].
    async fn send_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        let resp = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Send a request with `stream: true` and wrap the SSE body.
    async fn send_stream(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = builder
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(crate::sse::sse_response_stream(resp, parse_assistant_event))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire-format helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn build_run_body(req: &RunRequest, stream: bool) -> Value {
    let mut body = json!({ "assistant_id": req.assistant_id });
    if let Some(instructions) = &req.instructions {
        body["instructions"] = json!(instructions);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
    }
    if let Some(model) = &req.model {
        body["model"] = json!(model);
    }
    if stream {
        body["stream"] = json!(true);
    }
    body
}

fn build_tool_outputs_body(outputs: &[ToolOutput], stream: bool) -> Value {
    let mut body = json!({ "tool_outputs": outputs });
    if stream {
        body["stream"] = json!(true);
    }
    body
}

#[derive(serde::Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE event parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate one named SSE event into stream events.
///
/// Events that carry nothing the orchestrator needs (`thread.created`,
/// `thread.run.step.created`, `thread.message.completed`, ...) yield an
/// empty vec.
fn parse_assistant_event(event: Option<&str>, data: &str) -> Vec<Result<StreamEvent>> {
    let event = event.unwrap_or("");
    if event == "done" || data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done)];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    match event {
        "thread.run.created" => match v.get("id").and_then(Value::as_str) {
            Some(id) => vec![Ok(StreamEvent::RunCreated { run_id: id.into() })],
            None => Vec::new(),
        },
        "thread.message.delta" => parse_message_delta(&v),
        "thread.run.step.delta" => parse_step_delta(&v),
        "thread.run.requires_action" => match serde_json::from_value::<Run>(v) {
            Ok(run) => vec![Ok(StreamEvent::RequiresAction { run })],
            Err(e) => vec![Err(Error::Json(e))],
        },
        "thread.run.completed" => {
            let run_id = v.get("id").and_then(Value::as_str).unwrap_or_default();
            vec![Ok(StreamEvent::RunCompleted {
                run_id: run_id.into(),
            })]
        }
        "thread.run.failed"
        | "thread.run.expired"
        | "thread.run.cancelled"
        | "thread.run.incomplete" => match serde_json::from_value::<Run>(v) {
            Ok(run) => vec![Ok(StreamEvent::RunFailed {
                run_id: run.id.clone(),
                status: run.status,
                message: run.failure_message(),
            })],
            Err(e) => vec![Err(Error::Json(e))],
        },
        "error" => {
            let message = v
                .get("message")
                .or_else(|| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or(data)
                .to_string();
            vec![Ok(StreamEvent::Error { message })]
        }
        _ => Vec::new(),
    }
}

fn parse_message_delta(v: &Value) -> Vec<Result<StreamEvent>> {
    let Some(content) = v.pointer("/delta/content").and_then(Value::as_array) else {
        return Vec::new();
    };
    content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.pointer("/text/value").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(|text| Ok(StreamEvent::TextDelta { text: text.into() }))
        .collect()
}

fn parse_step_delta(v: &Value) -> Vec<Result<StreamEvent>> {
    let Some(calls) = v
        .pointer("/delta/step_details/tool_calls")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    calls
        .iter()
        .filter(|tc| tc.get("type").and_then(Value::as_str).unwrap_or("function") == "function")
        .map(|tc| {
            let str_at = |ptr: &str| {
                tc.pointer(ptr)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            Ok(StreamEvent::ToolCallDelta(ToolCallDelta {
                index: tc.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
                call_id: str_at("/id"),
                name: str_at("/function/name"),
                arguments: str_at("/function/arguments"),
            }))
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl AssistantBackend for OpenAiAssistants {
    async fn create_thread(&self) -> Result<Thread> {
        tracing::debug!(backend = %self.id, "creating thread");
        self.send_json(self.authed(reqwest::Method::POST, "/threads").json(&json!({})))
            .await
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread> {
        let thread_id = path_id("thread id", thread_id)?;
        let path = format!("/threads/{thread_id}");
        self.send_json(self.authed(reqwest::Method::GET, &path))
            .await
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<ThreadMessage> {
        let thread_id = path_id("thread id", thread_id)?;
        let path = format!("/threads/{thread_id}/messages");
        let body = json!({ "role": "user", "content": content });
        self.send_json(self.authed(reqwest::Method::POST, &path).json(&body))
            .await
    }

    async fn create_run(&self, thread_id: &str, req: &RunRequest) -> Result<Run> {
        let thread_id = path_id("thread id", thread_id)?;
        let path = format!("/threads/{thread_id}/runs");
        tracing::debug!(backend = %self.id, thread_id, "creating run");
        self.send_json(
            self.authed(reqwest::Method::POST, &path)
                .json(&build_run_body(req, false)),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let thread_id = path_id("thread id", thread_id)?;
        let run_id = path_id("run id", run_id)?;
        let path = format!("/threads/{thread_id}/runs/{run_id}");
        self.send_json(self.authed(reqwest::Method::GET, &path))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        let thread_id = path_id("thread id", thread_id)?;
        let run_id = path_id("run id", run_id)?;
        let path = format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs");
        tracing::debug!(backend = %self.id, thread_id, run_id, outputs = outputs.len(), "submitting tool outputs");
        self.send_json(
            self.authed(reqwest::Method::POST, &path)
                .json(&build_tool_outputs_body(outputs, false)),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>> {
        let thread_id = path_id("thread id", thread_id)?;
        let path = format!("/threads/{thread_id}/messages?order=desc&limit={limit}");
        let list: MessageList = self
            .send_json(self.authed(reqwest::Method::GET, &path))
            .await?;
        Ok(list.data)
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        req: &RunRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let thread_id = path_id("thread id", thread_id)?;
        let path = format!("/threads/{thread_id}/runs");
        tracing::debug!(backend = %self.id, thread_id, "streaming run");
        self.send_stream(
            self.authed(reqwest::Method::POST, &path)
                .json(&build_run_body(req, true)),
        )
        .await
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let thread_id = path_id("thread id", thread_id)?;
        let run_id = path_id("run id", run_id)?;
        let path = format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs");
        self.send_stream(
            self.authed(reqwest::Method::POST, &path)
                .json(&build_tool_outputs_body(outputs, true)),
        )
        .await
    }

    fn backend_id(&self) -> &str {
        &self.id
    }
}
