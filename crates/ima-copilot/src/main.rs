mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use ima_copilot::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// ima-copilot - Ask questions against an IMA knowledge base
#[derive(Parser, Debug)]
#[command(version = ima_copilot::VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file (falls back to IMA_* environment variables)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a question and print the answer
    Ask {
        /// The question to ask
        #[arg(value_name = "QUESTION")]
        question: String,

        /// Overall time budget in seconds (overrides config file)
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Print the raw message list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a valid token can be obtained
    Check,

    /// Show the effective configuration without secrets
    Config {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            question,
            timeout,
            json,
        } => commands::ask::run(&cli.config, &question, timeout, json).await,
        Commands::Check => commands::check::run(&cli.config).await,
        Commands::Config { format } => commands::config::run(&cli.config, &format).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
