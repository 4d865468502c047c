mod cli;
mod console;

use anyhow::{Context, Result};
use beach_pier_client::telemetry::logging::{self, LogConfig};
use beach_pier_client::{metrics, PierClient, PierConfig, PierHandle, SendOutcome, StatusClient};
use beach_pier_core::MessageHistory;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::{Cli, Command};
use crate::console::{ConsoleSink, Input};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("failed to initialise logging")?;

    let config = PierConfig::try_from(&cli)?;
    info!(target: "beach_pier::cli", server = %config.server, "beach-pier starting");

    match cli.command.clone().unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Status => run_status(config).await,
        Command::History { limit, scope } => run_history(config, limit, scope).await,
        Command::Whoami => run_whoami(config),
    }
}

async fn run_chat(config: PierConfig) -> Result<()> {
    let (client, handle) = PierClient::from_config(&config, Box::new(ConsoleSink))
        .context("failed to prepare client")?;
    let driver = client.spawn();
    println!("connecting to {}; /help lists commands", config.server);
    handle.connect()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !execute(&handle, console::parse_input(&line)).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().ok();
    driver.await.context("client runtime panicked")?;
    Ok(())
}

/// Returns `false` once the user asked to leave.
async fn execute(handle: &PierHandle, input: Input) -> Result<bool> {
    let outcome = match input {
        Input::Empty => None,
        Input::Chat(content) => Some(handle.send_chat(content).await?),
        Input::History { limit, scope } => Some(handle.request_history(limit, scope).await?),
        Input::Task => Some(handle.request_task().await?),
        Input::Connect => {
            handle.connect()?;
            None
        }
        Input::Disconnect => {
            handle.disconnect()?;
            None
        }
        Input::Stats => {
            println!("{}", console::format_stats(&handle.snapshot().await?));
            None
        }
        Input::Metrics => {
            print!("{}", metrics::render());
            None
        }
        Input::Help => {
            println!("{}", console::HELP);
            None
        }
        Input::Quit => return Ok(false),
        Input::Invalid(message) => {
            println!("! {message}");
            None
        }
    };
    if let Some(SendOutcome::Rejected(reason)) = outcome {
        println!("! not sent: {reason}");
    }
    Ok(true)
}

async fn run_status(config: PierConfig) -> Result<()> {
    let status = StatusClient::new(config.server.clone());
    let (instance, health) = tokio::join!(status.instance_info(), status.health());
    let instance = instance.context("GET /instance failed")?;
    println!("instance:    {}", instance.instance_id);
    println!("uptime:      {}", instance.uptime_display());
    println!("connections: {}", instance.connection_count);
    println!("tasks:       {}", instance.active_tasks);
    match health {
        Ok(health) => println!(
            "health:      {} (answered by {})",
            health.status, health.instance_id
        ),
        Err(err) => println!("health:      unavailable ({err})"),
    }
    Ok(())
}

async fn run_history(
    config: PierConfig,
    limit: u32,
    scope: beach_pier_core::HistoryScope,
) -> Result<()> {
    let identity = config.identity_store()?.get_or_create_client_id();
    let page = StatusClient::new(config.server.clone())
        .chat_history(limit, scope, Some(&identity.id))
        .await
        .context("GET /chat/history failed")?;
    let history = MessageHistory {
        messages: page.messages,
        source: Some(page.history_type),
    };
    let (chats, _) = history.chat_entries();
    for chat in chats {
        let sender = if chat.client_id == identity.id.as_str() {
            "you"
        } else {
            chat.client_id.as_str()
        };
        println!("{sender}: {}", chat.content);
    }
    println!("({} entries, {} scope)", page.count, scope.as_str());
    Ok(())
}

fn run_whoami(config: PierConfig) -> Result<()> {
    let resolved = config.identity_store()?.get_or_create_client_id();
    println!("{} ({:?})", resolved.id, resolved.source);
    Ok(())
}
