//! Shared helpers for backend adapters.

use qd_domain::config::AuthConfig;
use qd_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; everything else to [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Check that a backend object id is safe to splice into a URL path.
///
/// Thread and run ids are opaque tokens of `[A-Za-z0-9_-]`; anything else
/// (slashes, dots, `?`, percent escapes) is a [`Error::Validation`].
pub fn path_id<'a>(what: &str, id: &'a str) -> Result<&'a str> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(id)
    } else {
        Err(Error::Validation(format!("invalid {what} '{id}'")))
    }
}

/// Resolve the assistant API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext, warns)
/// 2. `service` + `account` in the OS keychain
/// 3. the `env` variable
/// 4. headless fallback env var `{SERVICE}_{ACCOUNT}`
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(key) = auth.key.as_ref().filter(|k| !k.is_empty()) {
        tracing::warn!("assistant API key loaded from plaintext config field 'key'");
        return Ok(key.clone());
    }

    if let (Some(service), Some(account)) = (&auth.service, &auth.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::warn!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if !auth.env.is_empty() {
        if let Ok(val) = std::env::var(&auth.env) {
            if !val.is_empty() {
                return Ok(val);
            }
        }
    }

    if let (Some(service), Some(account)) = (&auth.service, &auth.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            tracing::info!(
                env_var = %fallback_var,
                "API key resolved from keychain headless fallback env var"
            );
            return Ok(val);
        }
    }

    Err(Error::Auth(format!(
        "no assistant API key found: set '{}' or configure auth.key / keychain service+account",
        auth.env
    )))
}

/// Read a secret from the OS keychain.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// Store a secret in the OS keychain.
pub fn store_in_keychain(service: &str, account: &str, secret: &str) -> Result<()> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .set_password(secret)
        .map_err(|e| Error::Auth(format!("keyring set_password failed: {e}")))
}

/// Headless fallback env var name for a keychain service/account, e.g.
/// `("querydesk", "openai-api-key")` → `"QUERYDESK_OPENAI_API_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_ids_accept_backend_tokens_only() {
        assert_eq!(path_id("thread id", "thread_abc-123").unwrap(), "thread_abc-123");
        for bad in ["", "../assistants", "thread_1/runs", "thread_1?limit=1", "%2e%2e", "thread 1"] {
            let err = path_id("thread id", bad).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "{bad:?}");
        }
    }

    #[test]
    fn fallback_env_name() {
        assert_eq!(
            keychain_fallback_env_name("querydesk", "openai-api-key"),
            "QUERYDESK_OPENAI_API_KEY"
        );
    }

    #[test]
    fn plaintext_key_wins() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            env: "QD_TEST_SHOULD_NOT_BE_READ".into(),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "sk-test-123");
    }

    #[test]
    fn env_var_is_read() {
        let var_name = "QD_TEST_RESOLVE_ENV_KEY_4411";
        std::env::set_var(var_name, "env-secret");
        let auth = AuthConfig {
            env: var_name.into(),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret");
        std::env::remove_var(var_name);
    }

    #[test]
    fn missing_everything_names_the_env_var() {
        let auth = AuthConfig {
            env: "QD_TEST_NONEXISTENT_VAR_9191".into(),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("QD_TEST_NONEXISTENT_VAR_9191"));
    }

    #[test]
    fn keychain_headless_fallback() {
        // No keychain daemon in CI, so the lookup fails and the
        // `{SERVICE}_{ACCOUNT}` variable is used.
        let fallback_var = "QDTEST_FALLBACK_PROVIDER";
        std::env::set_var(fallback_var, "fallback-secret");
        let auth = AuthConfig {
            env: "QD_TEST_UNSET_ENV_5151".into(),
            service: Some("qdtest".into()),
            account: Some("fallback-provider".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "fallback-secret");
        std::env::remove_var(fallback_var);
    }
}
