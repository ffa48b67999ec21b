//! AppState construction and background-task spawning shared by `serve`
//! and `ask`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use qd_database::{DatabaseSchema, PgExecutor};
use qd_domain::config::{Config, ConfigSeverity};
use qd_providers::OpenAiAssistants;

use crate::state::AppState;

/// How often idle thread locks are dropped.
const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Assistant backend ────────────────────────────────────────────
    let backend = OpenAiAssistants::from_config(&config.assistant)
        .context("initializing assistant backend")?;
    tracing::info!(
        base_url = %config.assistant.base_url,
        assistant_id = %config.assistant.assistant_id,
        "assistant backend ready"
    );

    // ── Database ─────────────────────────────────────────────────────
    let executor = PgExecutor::from_config(&config.database).context("creating database pool")?;

    let schema = DatabaseSchema::load_or_default(config.database.schema_file.as_deref())
        .context("loading schema description")?;
    tracing::info!(tables = ?schema.table_names(), "schema description loaded");

    let state = AppState::new(config.clone(), Arc::new(backend), Arc::new(executor), &schema);
    tracing::info!(
        mode = ?config.chat.mode,
        tool_guard = ?config.database.guard.tool,
        query_guard = ?config.database.guard.query_endpoint,
        read_only_transactions = config.database.read_only_transactions,
        "runtime ready"
    );

    Ok(state)
}

/// Spawn the periodic housekeeping loops. Only `serve` calls this.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Idle thread-lock pruning ─────────────────────────────────────
    let locks = state.thread_locks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let before = locks.thread_count();
            locks.prune_idle();
            tracing::debug!(before, after = locks.thread_count(), "pruned idle thread locks");
        }
    });
}
