//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Follow assistant turns on an opencode-style server and print the final answer.
#[derive(Debug, Parser)]
#[command(name = "turnsync", version = crate::build_info::VERSION)]
#[command(long_version = crate::build_info::LONG_VERSION)]
pub struct Args {
    /// Path to config file (default: ./turnsync.toml or ~/.config/turnsync/turnsync.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Override server base URL.
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    /// Override the project directory sent with every request.
    #[arg(long = "directory", global = true)]
    pub directory: Option<String>,

    /// Emit updates and the final result as JSON lines.
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Feed a recorded event log (one JSON envelope per line) through the reducer.
    Replay {
        /// JSONL file with `{type, properties}` envelopes.
        events: PathBuf,
        /// Session to follow. Defaults to the first session seen in the log.
        #[arg(long = "session")]
        session: Option<String>,
        /// Turn start time in unix milliseconds.
        #[arg(long = "started-at", default_value_t = 0)]
        started_at: u64,
    },
    /// Follow a turn that is already running.
    Watch {
        #[arg(long = "session")]
        session: String,
        /// Assistant message id, when already known.
        #[arg(long = "message")]
        message: Option<String>,
    },
    /// Send a prompt to a session and follow the resulting turn.
    Ask {
        #[arg(long = "session")]
        session: String,
        /// Prompt text.
        prompt: String,
    },
}
