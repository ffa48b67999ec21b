use anyhow::Context;

use qd_database::DatabaseSchema;
use qd_domain::config::{Config, ConfigSeverity};

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when errors are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config).context("serializing config")?;
    print!("{output}");
    Ok(())
}

/// Prompt for the assistant API key and store it under the configured
/// keychain service and account.
pub fn set_secret(config: &Config) -> anyhow::Result<()> {
    let auth = &config.assistant.auth;
    let (Some(service), Some(account)) = (auth.service.as_deref(), auth.account.as_deref()) else {
        anyhow::bail!("set assistant.auth.service and assistant.auth.account before storing a secret");
    };

    let secret = rpassword::prompt_password_stderr(&format!("API key for {service}/{account}: "))
        .context("reading API key")?;
    let secret = secret.trim();
    if secret.is_empty() {
        anyhow::bail!("no key entered");
    }

    qd_providers::util::store_in_keychain(service, account, secret)
        .context("storing API key in keychain")?;
    println!("Stored API key for {service}/{account} in the OS keychain.");
    Ok(())
}

/// Print the schema description, or the full run instructions.
pub fn print_schema(config: &Config, instructions: bool) -> anyhow::Result<()> {
    let schema = DatabaseSchema::load_or_default(config.database.schema_file.as_deref())
        .context("loading schema description")?;
    if instructions {
        println!(
            "{}",
            schema.instructions(config.chat.tool_form, config.chat.extra_instructions.as_deref())
        );
    } else {
        print!("{}", schema.describe());
    }
    Ok(())
}
