//! `querydesk ask`: one polling turn from the command line.
//!
//! Useful for scripting and for checking a deployment end to end
//! without the browser UI.

use std::sync::Arc;

use anyhow::Context;

use qd_domain::config::{ChatMode, Config};

use crate::bootstrap;
use crate::runtime::{prepare_thread, run_turn, TurnEvent, TurnInput};

pub async fn ask(
    config: Arc<Config>,
    message: String,
    thread: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;

    let thread = prepare_thread(&state, thread.as_deref())
        .await
        .context("resolving thread")?;
    let permit = state
        .thread_locks
        .acquire(&thread.id)
        .await
        .context("locking thread")?;

    let input = TurnInput {
        thread_id: thread.id.clone(),
        message,
        mode: ChatMode::Polling,
    };
    let mut rx = run_turn(state.clone(), input, permit);

    let mut failed = None;
    let mut collected: Vec<TurnEvent> = Vec::new();

    while let Some(event) = rx.recv().await {
        if !json_output {
            match &event {
                TurnEvent::ToolCall { arguments, .. } => {
                    eprintln!("\x1b[2m[query_database] {arguments}\x1b[0m");
                }
                TurnEvent::Final { content } => println!("{content}"),
                TurnEvent::Error { message, .. } => failed = Some(message.clone()),
                _ => {}
            }
        } else if let TurnEvent::Error { message, .. } = &event {
            failed = Some(message.clone());
        }
        collected.push(event);
    }

    if json_output {
        let out = serde_json::json!({
            "threadId": thread.id,
            "events": collected,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("serializing events")?
        );
    } else {
        eprintln!("\x1b[2mthread: {}\x1b[0m", thread.id);
    }

    match failed {
        Some(message) => anyhow::bail!("turn failed: {message}"),
        None => Ok(()),
    }
}
