//! Progress events pushed to passive listeners.

use serde::Serialize;

use crate::query::QueryParams;

/// One status update. Serialized as `{"type": "...", "message": "...", ...}`.
///
/// Events are transient: never stored, never replayed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Connected {
        message: String,
        clients: usize,
    },
    Thinking {
        message: String,
    },
    Querying {
        message: String,
        query: String,
        #[serde(skip_serializing_if = "QueryParams::is_empty")]
        parameters: QueryParams,
    },
    Results {
        message: String,
        results: serde_json::Value,
        row_count: usize,
    },
    Error {
        message: String,
        error: String,
    },
    Complete {
        message: String,
    },
}

impl StatusEvent {
    pub fn connected(clients: usize) -> Self {
        Self::Connected {
            message: "SSE connection established".into(),
            clients,
        }
    }

    pub fn thinking(message: impl Into<String>) -> Self {
        Self::Thinking {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            error: error.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::Complete {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Thinking { .. } => "thinking",
            Self::Querying { .. } => "querying",
            Self::Results { .. } => "results",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}
