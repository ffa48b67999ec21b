mod assistant;
mod chat;
mod database;
mod observability;
mod server;

pub use assistant::*;
pub use chat::*;
pub use database::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// An empty vec means the config is usable as-is.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // ── assistant ──
        if self.assistant.base_url.is_empty() {
            errors.push(ConfigError::error("assistant.base_url", "base_url must not be empty"));
        }
        if self.assistant.assistant_id.is_empty() {
            errors.push(ConfigError::error(
                "assistant.assistant_id",
                "assistant_id must be set to a provisioned assistant",
            ));
        }
        if self.assistant.auth.key.is_some() {
            errors.push(ConfigError::warning(
                "assistant.auth.key",
                "plaintext API key in config; prefer auth.env or the OS keychain",
            ));
        }

        // ── chat ──
        if self.chat.poll_interval_ms == 0 {
            errors.push(ConfigError::error("chat.poll_interval_ms", "must be greater than 0"));
        }
        if self.chat.max_poll_attempts == 0 {
            errors.push(ConfigError::error("chat.max_poll_attempts", "must be greater than 0"));
        }
        if self.chat.max_tool_rounds == 0 {
            errors.push(ConfigError::error("chat.max_tool_rounds", "must be greater than 0"));
        }
        if self.chat.mode == ChatMode::Streaming
            && self.chat.streaming_tool_policy == StreamingToolPolicy::Report
        {
            errors.push(ConfigError::warning(
                "chat.streaming_tool_policy",
                "\"report\" never feeds query results back to the model",
            ));
        }

        // ── database ──
        if self.database.pool_size == 0 {
            errors.push(ConfigError::error("database.pool_size", "must be greater than 0"));
        }
        if self.database.max_rows == 0 {
            errors.push(ConfigError::error("database.max_rows", "must be greater than 0"));
        }
        if self.database.url.is_none() && self.database.url_env.is_empty() {
            errors.push(ConfigError::error(
                "database.url",
                "either url or url_env must be set",
            ));
        }
        if self.database.guard.query_endpoint == GuardMode::Off {
            errors.push(ConfigError::warning(
                "database.guard.query_endpoint",
                "the public query endpoint runs statements without a filter",
            ));
        }
        if self.database.guard.tool == GuardMode::Off && !self.database.read_only_transactions {
            errors.push(ConfigError::warning(
                "database.guard.tool",
                "model-issued statements are unfiltered and run in writable transactions",
            ));
        }

        // ── observability ──
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let mut cfg = Config::default();
        cfg.assistant.assistant_id = "asst_123".into();
        cfg
    }

    #[test]
    fn minimal_config_is_clean() {
        assert!(minimal().validate().is_empty());
    }

    #[test]
    fn missing_assistant_id_is_error() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "assistant.assistant_id" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn unguarded_public_endpoint_warns() {
        let mut cfg = minimal();
        cfg.database.guard.query_endpoint = GuardMode::Off;
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert_eq!(
            issues[0].to_string(),
            "[WARN] database.guard.query_endpoint: the public query endpoint runs statements without a filter"
        );
    }

    #[test]
    fn zero_poll_budget_is_error() {
        let mut cfg = minimal();
        cfg.chat.max_poll_attempts = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "chat.max_poll_attempts"));
    }

    #[test]
    fn sample_rate_out_of_range() {
        let mut cfg = minimal();
        cfg.observability.sample_rate = 1.5;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "observability.sample_rate"));
    }
}
