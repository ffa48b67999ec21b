use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub mode: ChatMode,
    /// Delay between run status polls.
    #[serde(default = "d_1000")]
    pub poll_interval_ms: u64,
    /// Poll budget for one turn, shared across tool rounds.
    #[serde(default = "d_60")]
    pub max_poll_attempts: u32,
    #[serde(default)]
    pub streaming_tool_policy: StreamingToolPolicy,
    /// Upper bound on `requires_action` rounds within one turn.
    #[serde(default = "d_8")]
    pub max_tool_rounds: u32,
    #[serde(default)]
    pub tool_form: ToolArgumentForm,
    /// Appended to the built-in run instructions.
    #[serde(default)]
    pub extra_instructions: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mode: ChatMode::default(),
            poll_interval_ms: d_1000(),
            max_poll_attempts: d_60(),
            streaming_tool_policy: StreamingToolPolicy::default(),
            max_tool_rounds: d_8(),
            tool_form: ToolArgumentForm::default(),
            extra_instructions: None,
        }
    }
}

/// How a turn talks to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Start a run, poll until it settles, reply with one JSON body.
    #[default]
    Polling,
    /// Stream deltas straight into the response body.
    Streaming,
}

/// What streaming mode does once the model has requested a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingToolPolicy {
    /// Execute, submit the outputs, and keep streaming the model's answer.
    #[default]
    RoundTrip,
    /// Execute, write the results as text, and end the turn.
    Report,
}

/// Shape of the `query_database` tool arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolArgumentForm {
    /// `{query, parameters: {name: value}}` with `:name` placeholders.
    #[default]
    Named,
    /// `{sql, values: [value]}` with `$n` markers.
    Positional,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> u64 {
    1000
}
fn d_60() -> u32 {
    60
}
fn d_8() -> u32 {
    8
}
