use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use beach_pier_client::config::{
    DEFAULT_SERVER, MAX_RECONNECTS_ENV, SERVER_ENV, STATE_FILE_ENV,
};
use beach_pier_client::connection::DEFAULT_MAX_ATTEMPTS;
use beach_pier_client::telemetry::logging::LogLevel;
use beach_pier_client::{ConnectingFailurePolicy, PierConfig, ServerEndpoint};
use beach_pier_core::HistoryScope;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "beach-pier",
    author,
    version,
    about = "Realtime chat client that follows its session across backend instances"
)]
pub struct Cli {
    /// Base URL of the chat server (http, https, ws or wss).
    #[arg(long, env = SERVER_ENV, default_value = DEFAULT_SERVER, global = true)]
    pub server: String,

    /// File holding the persisted client id.
    #[arg(long, env = STATE_FILE_ENV, global = true)]
    pub state_file: Option<PathBuf>,

    /// Use a throwaway client id that is never written to disk.
    #[arg(long, default_value_t = false, global = true)]
    pub ephemeral: bool,

    /// Automatic reconnect attempts before giving up.
    #[arg(long, env = MAX_RECONNECTS_ENV, default_value_t = DEFAULT_MAX_ATTEMPTS, global = true)]
    pub max_reconnects: u32,

    /// What a failed reconnect attempt does to the rest of the episode.
    #[arg(long, value_enum, default_value_t = ReconnectFailure::Retry, global = true)]
    pub on_reconnect_failure: ReconnectFailure,

    /// Seconds to wait for the websocket handshake.
    #[arg(long, env = "BEACH_PIER_CONNECT_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub connect_timeout_secs: u64,

    #[arg(long, value_enum, env = "BEACH_PIER_LOG_LEVEL", default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "BEACH_PIER_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Interactive chat session (default).
    Chat,
    /// Query the instance and health endpoints once.
    Status,
    /// Fetch stored chat history over HTTP.
    History {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value = "global")]
        scope: HistoryScope,
    },
    /// Print the persisted client id and where it came from.
    Whoami,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReconnectFailure {
    Retry,
    GiveUp,
}

impl From<ReconnectFailure> for ConnectingFailurePolicy {
    fn from(value: ReconnectFailure) -> Self {
        match value {
            ReconnectFailure::Retry => ConnectingFailurePolicy::Retry,
            ReconnectFailure::GiveUp => ConnectingFailurePolicy::GiveUp,
        }
    }
}

impl TryFrom<&Cli> for PierConfig {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let server = ServerEndpoint::parse(&cli.server)
            .with_context(|| format!("invalid server address: {}", cli.server))?;
        let mut config = PierConfig::new(server);
        config.state_file = cli.state_file.clone();
        config.ephemeral = cli.ephemeral;
        config.reconnect.max_attempts = cli.max_reconnects;
        config.reconnect.connecting_failures = cli.on_reconnect_failure.into();
        config.connect_timeout = Duration::from_secs(cli.connect_timeout_secs);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "beach-pier",
            "--server",
            "https://chat.example.com",
            "--max-reconnects",
            "2",
            "--on-reconnect-failure",
            "give-up",
            "--ephemeral",
            "status",
        ])
        .unwrap();
        let config = PierConfig::try_from(&cli).unwrap();
        assert!(config.server.is_secure());
        assert!(config.ephemeral);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(
            config.reconnect.connecting_failures,
            ConnectingFailurePolicy::GiveUp
        );
        assert!(matches!(cli.command, Some(Command::Status)));
    }

    #[test]
    fn history_scope_parses() {
        let cli =
            Cli::try_parse_from(["beach-pier", "history", "--scope", "user", "--limit", "5"]).unwrap();
        match cli.command {
            Some(Command::History { limit, scope }) => {
                assert_eq!(limit, 5);
                assert_eq!(scope, HistoryScope::User);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
