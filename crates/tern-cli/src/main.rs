//! Tern CLI
//!
//! Headless runner for the synchronization layer: bootstraps the entity
//! stores over REST, opens the push connection, and tails events and
//! connection state to stdout until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tern_core::{ChatClient, Config, EventType, StaticTokenProvider};

#[derive(Parser)]
#[command(name = "tern")]
#[command(about = "Tern - real-time chat synchronization client")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the config file (defaults to ~/.config/tern/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and tail live activity (default)
    Run,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value (api_url, ws_url)
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Some(Commands::Config { command }) => handle_config_command(command, config),
        Some(Commands::Run) | None => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let token = std::env::var("TERN_TOKEN").unwrap_or_default();
    if token.is_empty() {
        anyhow::bail!("TERN_TOKEN is not set. Export a bearer token and try again.");
    }

    let tokens = Arc::new(StaticTokenProvider::new(token));
    let client = ChatClient::new(&config, tokens);

    client.bus().subscribe(EventType::Message, |event| {
        println!(
            "[{}] message in {} from {}: {}",
            event.timestamp.format("%H:%M:%S"),
            event.receiver_id,
            event.sender_id,
            event.text
        );
    });
    client.bus().subscribe(EventType::FriendRequest, |event| {
        println!(
            "[{}] friend request from {}",
            event.timestamp.format("%H:%M:%S"),
            event.sender_id
        );
    });

    client
        .start()
        .await
        .context("failed to open the push connection")?;

    println!(
        "Synchronized: {} channels, {} guilds, {} pending friend requests.",
        client.channels().len(),
        client.guilds().len(),
        client.friends().len()
    );
    println!("Tailing events; press Ctrl-C to stop.");

    let mut state_rx = client.connection().subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("connection: {:?}", *state_rx.borrow_and_update());
            }
        }
    }

    info!("shutting down");
    client.logout().await;
    Ok(())
}

fn handle_config_command(command: Option<ConfigCommands>, config: Config) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(ConfigCommands::Set { key, value }) => {
            let mut config = config;
            match key.as_str() {
                "api_url" => config.api_url = value,
                "ws_url" => config.ws_url = value,
                other => anyhow::bail!("Unknown config key '{other}' (expected api_url or ws_url)"),
            }
            config.save()?;
            println!("Saved {}", Config::config_file_path().display());
            Ok(())
        }
    }
}
