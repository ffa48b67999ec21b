pub mod ask;
pub mod config;

use clap::{Parser, Subcommand};

/// querydesk: ask questions about your database in plain language.
#[derive(Debug, Parser)]
#[command(name = "querydesk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Send one message through a polling turn and print the answer.
    Ask {
        /// The message to send.
        message: String,
        /// Continue an existing thread instead of starting a new one.
        #[arg(long)]
        thread: Option<String>,
        /// Print every turn event as JSON instead of the answer text.
        #[arg(long)]
        json: bool,
    },
    /// Print the schema description given to the assistant.
    Schema {
        /// Print the full run instructions, not just the tables.
        #[arg(long)]
        instructions: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
    /// Store the assistant API key in the OS keychain.
    SetSecret,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `QD_CONFIG` (or `config.toml`
/// by default). A missing file means all defaults.
pub fn load_config() -> anyhow::Result<(qd_domain::config::Config, String)> {
    let config_path = std::env::var("QD_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        qd_domain::config::Config::default()
    };

    Ok((config, config_path))
}
