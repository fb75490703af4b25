//! Parley CLI entry point.
//!
//! Binary name: `parley`
//!
//! Loads configuration, installs the tracing subscriber, wires the pool,
//! providers and chat service, then dispatches to a command handler.

mod cli;
mod state;

use clap::Parser;
use tracing::instrument::WithSubscriber;

use cli::{Cli, Commands};
use parley_infra::config::load_config;
use parley_observe::tracing_setup::{bootstrap_subscriber, init_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Warnings about a malformed config file need a subscriber already.
    let config = load_config(&cli.config)
        .with_subscriber(bootstrap_subscriber())
        .await?;

    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "info,parley=debug",
        _ => "trace",
    };
    init_tracing(level, config.logging.format)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Status => {
            let state = AppState::init(config).await?;
            let result = cli::status::status(&state, cli.json).await;
            state.shutdown().await;
            result?;
        }

        Commands::Chat {
            message,
            conversation,
            restricted,
        } => {
            let state = AppState::init(config).await?;
            let result =
                cli::chat::send(&state, &message, conversation, restricted, cli.json).await;
            state.shutdown().await;
            result?;
        }

        Commands::History { conversation, limit } => {
            let repo = state::open_storage(&config).await?;
            let result = cli::chat::history(&repo, conversation, limit, cli.json).await;
            repo.pool().close().await;
            result?;
        }
    }

    Ok(())
}
