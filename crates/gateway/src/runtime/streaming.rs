//! Streaming run protocol.
//!
//! Text deltas are forwarded as they arrive. Function-call fragments go
//! through a [`ToolCallAssembler`]; when the stream pauses on
//! `requires_action` the assembled calls are executed and, under the
//! `round_trip` policy, their outputs are streamed back into the same run.
//! The `report` policy writes the results as text and ends the turn.

use futures_util::StreamExt;
use tokio::sync::mpsc;

use qd_domain::assistant::Run;
use qd_domain::config::StreamingToolPolicy;
use qd_domain::error::{Error, Result};
use qd_domain::stream::{BoxStream, StreamEvent};
use qd_domain::tool::RawToolCall;
use qd_providers::RunRequest;

use super::assembler::ToolCallAssembler;
use super::tools::QUERY_TOOL;
use super::{check_round_budget, execute_call, ToolExecution, TurnEvent};
use crate::state::AppState;

type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// How one stream segment ended.
enum Segment {
    Completed,
    RequiresAction { run: Run, calls: Vec<RawToolCall> },
    /// The stream closed with no terminal run event.
    Ended { calls: Vec<RawToolCall> },
}

pub(super) async fn drive(
    state: &AppState,
    thread_id: &str,
    request: &RunRequest,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<String> {
    let policy = state.config.chat.streaming_tool_policy;
    let mut answer = String::new();
    let mut rounds: u32 = 0;

    let mut stream = state.backend.stream_run(thread_id, request).await?;

    loop {
        let segment = consume(state, &mut stream, tx, &mut answer).await?;

        let (run, calls) = match segment {
            Segment::Completed => return Ok(answer),
            Segment::Ended { calls } if calls.is_empty() => return Ok(answer),
            Segment::Ended { calls } => {
                // Nothing to resume; report what the model asked for.
                report(state, &calls, tx, &mut answer).await;
                return Ok(answer);
            }
            Segment::RequiresAction { run, calls } => (run, calls),
        };

        match policy {
            StreamingToolPolicy::Report => {
                report(state, &calls, tx, &mut answer).await;
                return Ok(answer);
            }
            StreamingToolPolicy::RoundTrip => {
                rounds += 1;
                check_round_budget(rounds, state.config.chat.max_tool_rounds, &run.id)?;

                let mut outputs = Vec::with_capacity(calls.len());
                for raw in &calls {
                    outputs.push(execute_call(state, raw, tx).await.to_output());
                }
                tracing::info!(run_id = %run.id, outputs = outputs.len(), round = rounds, "resuming run with tool outputs");

                stream = state
                    .backend
                    .submit_tool_outputs_stream(thread_id, &run.id, &outputs)
                    .await?;
            }
        }
    }
}

/// Read one stream until it pauses, completes, fails, or closes.
async fn consume(
    state: &AppState,
    stream: &mut EventStream,
    tx: &mpsc::Sender<TurnEvent>,
    answer: &mut String,
) -> Result<Segment> {
    let mut assembler = ToolCallAssembler::new(state.tools.names());
    let mut completed = false;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::RunCreated { run_id } => {
                tracing::info!(run_id = %run_id, "run started");
            }
            StreamEvent::TextDelta { text } => {
                answer.push_str(&text);
                let _ = tx.send(TurnEvent::AssistantDelta { text }).await;
            }
            StreamEvent::ToolCallDelta(delta) => assembler.push(&delta),
            StreamEvent::RequiresAction { run } => {
                let calls = reconcile(assembler.finish()?, &run);
                return Ok(Segment::RequiresAction { run, calls });
            }
            StreamEvent::RunCompleted { run_id } => {
                tracing::info!(run_id = %run_id, "run completed");
                completed = true;
            }
            StreamEvent::RunFailed {
                run_id,
                status,
                message,
            } => {
                tracing::warn!(run_id = %run_id, status = %status, "run failed");
                return Err(Error::RunFailure {
                    status: status.to_string(),
                    message,
                });
            }
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: state.backend.backend_id().to_string(),
                    message,
                });
            }
            StreamEvent::Done => break,
        }
    }

    if completed {
        Ok(Segment::Completed)
    } else {
        Ok(Segment::Ended {
            calls: assembler.finish()?,
        })
    }
}

/// Prefer the assembled calls; fall back to the run's own list when the
/// two disagree on which calls are pending.
fn reconcile(assembled: Vec<RawToolCall>, run: &Run) -> Vec<RawToolCall> {
    let pending = run.pending_tool_calls();
    if pending.is_empty() {
        return assembled;
    }
    let same_calls = assembled.len() == pending.len()
        && assembled
            .iter()
            .all(|a| pending.iter().any(|p| p.call_id == a.call_id));
    if same_calls {
        assembled
    } else {
        tracing::warn!(
            run_id = %run.id,
            assembled = assembled.len(),
            pending = pending.len(),
            "streamed tool calls disagree with run, using the run's list"
        );
        pending
    }
}

/// Execute calls and append their results to the reply text.
///
/// The first failing call is reported and ends the turn; later calls in
/// the same batch are not executed.
async fn report(
    state: &AppState,
    calls: &[RawToolCall],
    tx: &mpsc::Sender<TurnEvent>,
    answer: &mut String,
) {
    for raw in calls {
        if raw.tool_name != QUERY_TOOL || raw.arguments.trim().is_empty() {
            tracing::debug!(call_id = %raw.call_id, tool_name = %raw.tool_name, "skipping unrecognized or empty call");
            continue;
        }
        let exec = execute_call(state, raw, tx).await;
        let text = report_text(&exec);
        answer.push_str(&text);
        let _ = tx.send(TurnEvent::AssistantDelta { text }).await;
        if exec.outcome.is_err() {
            tracing::debug!(call_id = %raw.call_id, "stopping report after failed call");
            return;
        }
    }
}

fn report_text(exec: &ToolExecution) -> String {
    match (&exec.request, &exec.outcome) {
        (Some(request), Ok(result)) => format!(
            "\nExecuting query: {}\nValues: {}\nResults: {}\n",
            serde_json::to_string(&request.statement).unwrap_or_default(),
            serde_json::to_string(&request.params).unwrap_or_default(),
            serde_json::to_string(&result.rows).unwrap_or_default(),
        ),
        (_, Err(e @ Error::Parse(_))) => format!("\nError: could not parse tool arguments => {e}\n"),
        (_, Err(e @ Error::Database { .. })) => format!("\nDatabase error: {e}\n"),
        (_, Err(e)) => format!("\nError: {e}\n"),
        (None, Ok(_)) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qd_domain::query::{QueryRequest, QueryResult};
    use std::collections::BTreeMap;

    fn run_with_calls(ids: &[&str]) -> Run {
        let calls: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "function": { "name": "query_database", "arguments": "{}" }
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": { "tool_calls": calls }
            }
        }))
        .unwrap()
    }

    fn raw(id: &str) -> RawToolCall {
        RawToolCall {
            call_id: id.into(),
            tool_name: QUERY_TOOL.into(),
            arguments: "{\"query\":\"SELECT 1\"}".into(),
        }
    }

    #[test]
    fn reconcile_keeps_matching_assembled_calls() {
        let calls = reconcile(vec![raw("call_a")], &run_with_calls(&["call_a"]));
        assert_eq!(calls[0].arguments, "{\"query\":\"SELECT 1\"}");
    }

    #[test]
    fn reconcile_falls_back_to_run_list() {
        let calls = reconcile(vec![raw("call_0")], &run_with_calls(&["call_a", "call_b"]));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "call_a");
    }

    #[test]
    fn report_text_for_results_and_errors() {
        let ok = ToolExecution {
            call_id: "c".into(),
            tool_name: QUERY_TOOL.into(),
            request: Some(QueryRequest::named("SELECT 1", BTreeMap::new())),
            outcome: Ok(QueryResult::default()),
        };
        let text = report_text(&ok);
        assert!(text.contains("Executing query: \"SELECT 1\""));
        assert!(text.contains("Results: []"));

        let db = ToolExecution {
            request: None,
            outcome: Err(Error::database("SELECT x", "boom")),
            ..ok
        };
        assert!(report_text(&db).starts_with("\nDatabase error:"));
    }
}
