use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::assistant::{Run, RunStatus};

/// A boxed async stream, used for assistant streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a run streams (backend-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The backend accepted the run.
    #[serde(rename = "run_created")]
    RunCreated { run_id: String },

    /// A text chunk of the assistant's reply.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// A fragment of a function call.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta(ToolCallDelta),

    /// The run paused waiting for tool outputs. Terminal for this stream.
    #[serde(rename = "requires_action")]
    RequiresAction { run: Run },

    /// The run finished successfully.
    #[serde(rename = "run_completed")]
    RunCompleted { run_id: String },

    /// The run ended in `failed`, `expired`, `cancelled`, or `incomplete`.
    #[serde(rename = "run_failed")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        message: String,
    },

    /// The stream is finished.
    #[serde(rename = "done")]
    Done,

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// An incremental fragment of a function call.
///
/// `name` and `call_id` usually arrive only on the first fragment of a
/// call; later fragments carry just `index` and a slice of `arguments`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}
