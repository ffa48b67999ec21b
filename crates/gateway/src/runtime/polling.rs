//! Poll-based run protocol.
//!
//! Start a run, poll its status at a fixed interval, answer every
//! `requires_action` with one batch of tool outputs, and read the answer
//! off the thread once the run completes. One poll budget covers the
//! whole turn, across tool rounds.

use std::time::Duration;

use tokio::sync::mpsc;

use qd_domain::assistant::{Role, RunStatus};
use qd_domain::error::{Error, Result};
use qd_providers::RunRequest;

use super::{check_round_budget, execute_call, TurnEvent};
use crate::state::AppState;

/// Messages fetched when looking for the reply.
const ANSWER_LOOKBACK: u32 = 10;

pub(super) async fn drive(
    state: &AppState,
    thread_id: &str,
    request: &RunRequest,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<String> {
    let chat = &state.config.chat;
    let interval = Duration::from_millis(chat.poll_interval_ms);

    let mut run = state.backend.create_run(thread_id, request).await?;
    tracing::info!(run_id = %run.id, status = %run.status, "run started");

    let mut polls: u32 = 0;
    let mut rounds: u32 = 0;

    loop {
        match run.status {
            RunStatus::Completed => break,
            RunStatus::RequiresAction => {
                rounds += 1;
                check_round_budget(rounds, chat.max_tool_rounds, &run.id)?;

                let calls = run.pending_tool_calls();
                tracing::info!(run_id = %run.id, calls = calls.len(), round = rounds, "run requires action");

                let mut outputs = Vec::with_capacity(calls.len());
                for raw in &calls {
                    outputs.push(execute_call(state, raw, tx).await.to_output());
                }

                run = state
                    .backend
                    .submit_tool_outputs(thread_id, &run.id, &outputs)
                    .await?;
                continue;
            }
            status if status.is_failure() => {
                return Err(Error::RunFailure {
                    status: status.to_string(),
                    message: run.failure_message(),
                });
            }
            _ => {}
        }

        if polls >= chat.max_poll_attempts {
            // The run is left to finish or expire on the backend.
            return Err(Error::Timeout(format!(
                "run {} still {} after {} polls",
                run.id, run.status, polls
            )));
        }
        polls += 1;
        tokio::time::sleep(interval).await;

        run = state.backend.retrieve_run(thread_id, &run.id).await?;
        tracing::debug!(run_id = %run.id, status = %run.status, poll = polls, "polled run");
    }

    tracing::info!(run_id = %run.id, polls, rounds, "run completed");
    extract_answer(state, thread_id).await
}

/// First text block of the most recent assistant message.
async fn extract_answer(state: &AppState, thread_id: &str) -> Result<String> {
    let messages = state
        .backend
        .list_messages(thread_id, ANSWER_LOOKBACK)
        .await?;

    let latest = messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .ok_or_else(|| provider_error(state, "run completed without an assistant message"))?;

    latest
        .first_text()
        .map(str::to_string)
        .ok_or_else(|| provider_error(state, "latest assistant message has no text content"))
}

fn provider_error(state: &AppState, message: &str) -> Error {
    Error::Provider {
        provider: state.backend.backend_id().to_string(),
        message: message.into(),
    }
}
