use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Internal tool call format, with arguments already parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// A completed tool call whose arguments have not been parsed yet.
///
/// Both ingestion modes produce this: the streaming assembler once the
/// stream reaches a terminal event, and a polled run in `requires_action`
/// which carries the arguments in one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: String,
}

impl RawToolCall {
    /// Parse the argument text as JSON.
    ///
    /// Empty arguments are treated as an empty object.
    pub fn parse(&self) -> Result<ToolCall> {
        let trimmed = self.arguments.trim();
        let arguments = if trimmed.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(trimmed).map_err(|e| {
                Error::Parse(format!(
                    "could not parse arguments for {} ({}): {e}",
                    self.tool_name, self.call_id
                ))
            })?
        };
        Ok(ToolCall {
            call_id: self.call_id.clone(),
            tool_name: self.tool_name.clone(),
            arguments,
        })
    }
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// The output of one tool call, submitted back to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}
