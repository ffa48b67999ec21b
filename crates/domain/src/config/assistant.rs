use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hosted assistant backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Identifier of the pre-provisioned assistant every run is started on.
    #[serde(default)]
    pub assistant_id: String,
    /// Overrides the assistant's configured model for each run.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "d_60000")]
    pub timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            assistant_id: String::new(),
            model: None,
            auth: AuthConfig::default(),
            timeout_ms: d_60000(),
        }
    }
}

/// Where the API key comes from.
///
/// Resolution order: `key` → keychain (`service` + `account`) → `env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Plaintext key. Prefer `env` or the keychain.
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable containing the key.
    #[serde(default = "d_key_env")]
    pub env: String,
    /// Keychain service name (e.g. "querydesk").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g. "openai-api-key").
    #[serde(default)]
    pub account: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key: None,
            env: d_key_env(),
            service: None,
            account: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_60000() -> u64 {
    60_000
}
fn d_key_env() -> String {
    "OPENAI_API_KEY".into()
}
