//! Configuration commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Subcommand;
use colored::Colorize;
use scribe_orchestrator::OrchestratorConfig;

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Execute a config command.
pub fn execute(command: ConfigCommand, path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => show(path),
        ConfigCommand::Init { force } => init(path, force),
    }
}

fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let target: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => OrchestratorConfig::default_config_path().context("HOME is not set; pass --config")?,
    };
    if target.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", target.display());
    }

    OrchestratorConfig::default()
        .save_to_file(&target)
        .with_context(|| format!("writing {}", target.display()))?;
    println!("{} {}", "Wrote".green(), target.display());
    Ok(())
}
