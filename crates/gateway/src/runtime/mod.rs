//! Conversation orchestrator: one user turn against the hosted assistant.
//!
//! Entry points: [`prepare_thread`] resolves the conversation handle, then
//! [`run_turn`] submits the message, drives the run (polling or
//! streaming), dispatches tool calls, and reports progress to the status
//! broadcaster. Callers read [`TurnEvent`]s from the returned channel.

pub mod assembler;
mod polling;
pub mod status;
mod streaming;
pub mod thread_lock;
pub mod tools;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::Instrument;

use qd_domain::config::ChatMode;
use qd_domain::error::{Error, Result};
use qd_domain::query::{QueryRequest, QueryResult};
use qd_domain::status::StatusEvent;
use qd_domain::tool::{RawToolCall, ToolOutput};

use qd_providers::util::path_id;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental reply text (streaming mode only).
    AssistantDelta { text: String },

    /// The model asked for a tool.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// What the tool produced, as submitted back to the run.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// The full answer text.
    Final { content: String },

    /// The turn failed. Always the last event.
    Error { kind: &'static str, message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved conversation handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub id: String,
    /// The thread was created for this turn.
    pub created: bool,
}

pub struct TurnInput {
    pub thread_id: String,
    pub message: String,
    pub mode: ChatMode,
}

/// Reuse the supplied thread, or create one when none is given.
///
/// A supplied id is looked up first so an unknown handle fails here
/// instead of mid-turn. An id that is not a plain backend token is a
/// validation error and never reaches the backend.
pub async fn prepare_thread(state: &AppState, requested: Option<&str>) -> Result<ThreadHandle> {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => {
            let id = path_id("thread id", id)?;
            let thread = state.backend.retrieve_thread(id).await?;
            tracing::debug!(thread_id = %thread.id, "reusing thread");
            Ok(ThreadHandle {
                id: thread.id,
                created: false,
            })
        }
        None => {
            let thread = state.backend.create_thread().await?;
            tracing::info!(thread_id = %thread.id, "created thread");
            Ok(ThreadHandle {
                id: thread.id,
                created: true,
            })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn in a background task.
///
/// `permit` is the thread's lock; it is held until the turn finishes,
/// even if the caller stops reading events.
pub fn run_turn(
    state: AppState,
    input: TurnInput,
    permit: OwnedSemaphorePermit,
) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);

    let span = tracing::info_span!("turn", thread_id = %input.thread_id, mode = ?input.mode);
    tokio::spawn(
        async move {
            let _permit = permit;
            match execute_turn(&state, &input, &tx).await {
                Ok(answer) => {
                    state.status.publish(&StatusEvent::complete("Response ready"));
                    let _ = tx.send(TurnEvent::Final { content: answer }).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), "turn failed");
                    state
                        .status
                        .publish(&StatusEvent::error("Failed to process request", e.to_string()));
                    let _ = tx
                        .send(TurnEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        .instrument(span),
    );

    rx
}

async fn execute_turn(
    state: &AppState,
    input: &TurnInput,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<String> {
    state
        .status
        .publish(&StatusEvent::thinking("Processing your request"));

    state
        .backend
        .add_message(&input.thread_id, &input.message)
        .await?;

    let request = state.run_request();
    match input.mode {
        ChatMode::Polling => polling::drive(state, &input.thread_id, &request, tx).await,
        ChatMode::Streaming => streaming::drive(state, &input.thread_id, &request, tx).await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch (shared by both protocols)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One executed tool call.
pub(crate) struct ToolExecution {
    pub call_id: String,
    pub tool_name: String,
    /// `None` when the arguments never became a request.
    pub request: Option<QueryRequest>,
    pub outcome: Result<QueryResult>,
}

impl ToolExecution {
    pub fn to_output(&self) -> ToolOutput {
        ToolOutput {
            tool_call_id: self.call_id.clone(),
            output: tools::render_output(&self.outcome),
        }
    }
}

/// Parse, guard, and run one call, reporting each step.
///
/// Failures land in `outcome`; this never aborts the turn by itself.
pub(crate) async fn execute_call(
    state: &AppState,
    raw: &RawToolCall,
    tx: &mpsc::Sender<TurnEvent>,
) -> ToolExecution {
    let prepared = match raw.parse() {
        Ok(call) => {
            let _ = tx
                .send(TurnEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
            state.tools.prepare(&call)
        }
        Err(e) => Err(e),
    };

    let (request, outcome) = match prepared {
        Ok(request) => {
            tracing::info!(
                call_id = %raw.call_id,
                tool_name = %raw.tool_name,
                params = request.params.len(),
                "executing tool call"
            );
            state.status.publish(&StatusEvent::Querying {
                message: "Executing database query".into(),
                query: request.statement.clone(),
                parameters: request.params.clone(),
            });
            let outcome = state.tools.run(&request).await;
            (Some(request), outcome)
        }
        Err(e) => (None, Err(e)),
    };

    let exec = ToolExecution {
        call_id: raw.call_id.clone(),
        tool_name: raw.tool_name.clone(),
        request,
        outcome,
    };

    match &exec.outcome {
        Ok(result) => {
            state.status.publish(&StatusEvent::Results {
                message: format!("Query returned {} row(s)", result.row_count),
                results: serde_json::to_value(&result.rows).unwrap_or(Value::Null),
                row_count: result.row_count,
            });
        }
        Err(e) => {
            tracing::warn!(call_id = %raw.call_id, error = %e, kind = e.kind(), "tool call failed");
            state
                .status
                .publish(&StatusEvent::error("Query failed", e.to_string()));
        }
    }

    let output = exec.to_output();
    let _ = tx
        .send(TurnEvent::ToolResult {
            call_id: exec.call_id.clone(),
            tool_name: exec.tool_name.clone(),
            content: output.output,
            is_error: exec.outcome.is_err(),
        })
        .await;

    exec
}

/// Refuse another tool round once `max_rounds` have run.
pub(crate) fn check_round_budget(rounds: u32, max_rounds: u32, run_id: &str) -> Result<()> {
    if rounds > max_rounds {
        return Err(Error::RunFailure {
            status: "requires_action".into(),
            message: format!("run {run_id} requested more than {max_rounds} tool rounds"),
        });
    }
    Ok(())
}
