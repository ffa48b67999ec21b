use std::sync::Arc;

use qd_database::{DatabaseSchema, QueryExecutor, QueryGuard};
use qd_domain::config::Config;
use qd_providers::{AssistantBackend, RunRequest};

use crate::runtime::status::StatusBroadcaster;
use crate::runtime::thread_lock::ThreadLockMap;
use crate::runtime::tools::ToolSet;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config, assistant backend, query executor
/// - **Tools & prompting**: the tool set and the run instructions
/// - **Runtime**: status listeners and per-thread locks
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub backend: Arc<dyn AssistantBackend>,
    pub executor: Arc<dyn QueryExecutor>,

    // ── Tools & prompting ─────────────────────────────────────────────
    pub tools: Arc<ToolSet>,
    /// Guard applied by `POST /query`.
    pub public_guard: QueryGuard,
    /// Schema description plus query rules, sent with every run.
    pub instructions: Arc<str>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub status: Arc<StatusBroadcaster>,
    pub thread_locks: Arc<ThreadLockMap>,
}

impl AppState {
    /// Wire the runtime around an already-built backend and executor.
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn AssistantBackend>,
        executor: Arc<dyn QueryExecutor>,
        schema: &DatabaseSchema,
    ) -> Self {
        let db = &config.database;
        let tools = ToolSet::new(
            config.chat.tool_form,
            QueryGuard::new(db.guard.tool),
            executor.clone(),
            db.max_rows,
        );
        let instructions = schema.instructions(
            config.chat.tool_form,
            config.chat.extra_instructions.as_deref(),
        );

        Self {
            public_guard: QueryGuard::new(db.guard.query_endpoint),
            tools: Arc::new(tools),
            instructions: Arc::from(instructions),
            status: Arc::new(StatusBroadcaster::new()),
            thread_locks: Arc::new(ThreadLockMap::new()),
            config,
            backend,
            executor,
        }
    }

    /// Parameters for every run started by this process.
    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            assistant_id: self.config.assistant.assistant_id.clone(),
            instructions: Some(self.instructions.to_string()),
            tools: self.tools.definitions(),
            model: self.config.assistant.model.clone(),
        }
    }
}
