//! CLI command definitions for the `parley` binary.

pub mod chat;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use parley_infra::config::DEFAULT_CONFIG_FILE;

/// Chat with a primary model, falling back to a secondary when it fails.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        env = "PARLEY_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logging (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show database, provider and circuit breaker health.
    Status,

    /// Send a message and print the reply.
    Chat {
        /// Message text.
        message: String,

        /// Continue an existing conversation (a new one is started otherwise).
        #[arg(long)]
        conversation: Option<Uuid>,

        /// Route to the secondary provider only.
        #[arg(long)]
        restricted: bool,
    },

    /// Print the most recent messages of a conversation.
    History {
        /// Conversation id.
        conversation: Uuid,

        /// Number of messages to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}
