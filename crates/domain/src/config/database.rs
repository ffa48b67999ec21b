use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string. When unset, read from `url_env`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "d_url_env")]
    pub url_env: String,
    #[serde(default = "d_8")]
    pub pool_size: usize,
    #[serde(default = "d_5000")]
    pub connect_timeout_ms: u64,
    /// Run every statement inside a `READ ONLY` transaction.
    #[serde(default = "d_true")]
    pub read_only_transactions: bool,
    /// Rows handed back to the model per statement.
    #[serde(default = "d_200")]
    pub max_rows: usize,
    /// Schema description given to the model. Built-in deliveries schema
    /// when unset.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    #[serde(default)]
    pub guard: GuardConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: d_url_env(),
            pool_size: d_8(),
            connect_timeout_ms: d_5000(),
            read_only_transactions: true,
            max_rows: d_200(),
            schema_file: None,
            guard: GuardConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// The connection string, from `url` or else the `url_env` variable.
    pub fn resolve_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        std::env::var(&self.url_env).ok().filter(|v| !v.is_empty())
    }
}

/// Statement filter applied before execution, chosen per entry point.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardConfig {
    /// Statements issued by the model through `query_database`.
    #[serde(default)]
    pub tool: GuardMode,
    /// Statements posted to the public `/query` endpoint.
    #[serde(default)]
    pub query_endpoint: GuardMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// No lexical filter; database privileges are the only boundary.
    Off,
    /// Case-insensitive substring match on mutating keywords.
    #[default]
    Keyword,
    /// Single read statement, checked token by token.
    ReadOnly,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_url_env() -> String {
    "DATABASE_URL".into()
}
fn d_8() -> usize {
    8
}
fn d_5000() -> u64 {
    5000
}
fn d_true() -> bool {
    true
}
fn d_200() -> usize {
    200
}
