/// Shared error type used across all querydesk crates.
///
/// The first six variants form the failure taxonomy surfaced to callers
/// (see [`Error::kind`]); the rest are ambient plumbing failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A statement was rejected by the query guard before execution.
    #[error("validation: {0}")]
    Validation(String),

    /// Tool-call arguments could not be parsed.
    #[error("parse: {0}")]
    Parse(String),

    /// The database driver failed while running `statement`.
    #[error("database query failed: {message} (statement: {statement})")]
    Database { statement: String, message: String },

    /// The assistant backend reported the run as failed, expired, or cancelled.
    #[error("run {status}: {message}")]
    RunFailure { status: String, message: String },

    /// A poll or request budget was exhausted.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Push-channel delivery failed.
    #[error("transport: {0}")]
    Transport(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Taxonomy name reported to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Parse(_) | Error::Json(_) => "ParseError",
            Error::Database { .. } => "DatabaseError",
            Error::RunFailure { .. } => "RunFailure",
            Error::Timeout(_) => "TimeoutError",
            Error::Transport(_) => "TransportError",
            Error::Http(_) | Error::Provider { .. } => "ProviderError",
            Error::Io(_) | Error::Config(_) | Error::Auth(_) | Error::Other(_) => "InternalError",
        }
    }

    /// Wrap a driver failure with the statement that caused it.
    pub fn database(statement: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Database {
            statement: statement.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_keeps_statement_context() {
        let err = Error::database("SELECT * FROM nope", "relation \"nope\" does not exist");
        let text = err.to_string();
        assert!(text.contains("SELECT * FROM nope"));
        assert!(text.contains("does not exist"));
        assert_eq!(err.kind(), "DatabaseError");
    }

    #[test]
    fn json_errors_classify_as_parse() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "ParseError");
    }
}
