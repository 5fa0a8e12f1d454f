use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "logr", version, about = "API log ingestion and analytics backend")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the ingestion and analytics HTTP API (default)
    Start {
        /// Also run a processing worker pool in this process
        #[arg(short, long)]
        with_worker: bool,
    },

    /// Run a standalone processing worker
    Worker,

    /// List jobs of a service that exhausted their retries
    DeadLetters {
        /// Service whose dead letters to list
        #[arg(short, long)]
        service: String,

        /// Maximum number of entries, newest first
        #[arg(short, long, default_value_t = 20)]
        limit: i64,

        /// Print each preserved payload
        #[arg(short, long)]
        payload: bool,
    },

    /// Test configuration file validity
    Test,

    /// Show version information
    Version,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Start { with_worker: false })
    }
}
