//! Command implementations for the Scribe CLI.

pub mod config;
pub mod orchestrate;

pub use config::ConfigCommand;

use std::path::Path;

use scribe_orchestrator::OrchestratorConfig;

/// Loads the configuration from `explicit`, the default path, or defaults.
///
/// An explicit path must exist; the default path is optional.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    if let Some(path) = explicit {
        return Ok(OrchestratorConfig::load_from_file(path)?);
    }
    match OrchestratorConfig::default_config_path().filter(|p| p.exists()) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading default config");
            Ok(OrchestratorConfig::load_from_file(&path)?)
        }
        None => Ok(OrchestratorConfig::default()),
    }
}
