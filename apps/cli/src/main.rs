//! Scribe CLI - command-line front end for the Scribe orchestration core
//!
//! Provides a `scribe` command that runs a single writing request through
//! the orchestrator and manages its configuration file.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{config, orchestrate, ConfigCommand};

/// Scribe - agentic orchestration for long-form writing
#[derive(Parser, Debug)]
#[command(name = "scribe", author, version, about = "Scribe - agentic orchestration for long-form writing")]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Orchestrator config file (defaults to ~/.scribe/orchestrator.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one request through the orchestrator
    ///
    /// Classifies the message, plans the work, picks an execution strategy
    /// and prints the resulting messages and section text.
    Orchestrate(orchestrate::OrchestrateArgs),

    /// Classify a message with the local patterns only
    Classify {
        /// Message to classify
        message: String,
    },

    /// Show or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let builder =
        FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).without_time().with_target(false);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    match args.command {
        Command::Orchestrate(orchestrate_args) => orchestrate::execute(orchestrate_args, args.config.as_deref()).await,
        Command::Classify { message } => orchestrate::classify(&message),
        Command::Config(cmd) => config::execute(cmd, args.config.as_deref()),
    }
}
