use qd_domain::assistant::{Run, Thread, ThreadMessage};
use qd_domain::error::Result;
use qd_domain::stream::{BoxStream, StreamEvent};
use qd_domain::tool::{ToolDefinition, ToolOutput};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for starting a run on a thread.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// The pre-provisioned assistant to run.
    pub assistant_id: String,
    /// Replaces the assistant's stored instructions for this run.
    pub instructions: Option<String>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. When `None`, the assistant's model is used.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A hosted assistant that owns threads and executes runs.
///
/// The reasoning itself is opaque; this trait only covers invoking it and
/// consuming its output, either by polling run status or by streaming.
#[async_trait::async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Create an empty thread.
    async fn create_thread(&self) -> Result<Thread>;

    /// Look up an existing thread. Fails if the backend does not know it.
    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread>;

    /// Append a user turn to a thread.
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<ThreadMessage>;

    /// Start a run and return immediately (polling protocol).
    async fn create_run(&self, thread_id: &str, req: &RunRequest) -> Result<Run>;

    /// Fetch the current state of a run.
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Submit every pending tool output for a run in one batch.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;

    /// The most recent `limit` messages of a thread, newest first.
    async fn list_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>>;

    /// Start a run and stream its events.
    async fn stream_run(
        &self,
        thread_id: &str,
        req: &RunRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Submit tool outputs and stream the resumed run.
    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Identifier used in logs and error messages.
    fn backend_id(&self) -> &str;
}
