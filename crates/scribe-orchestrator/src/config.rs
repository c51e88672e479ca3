// Orchestrator configuration
//
// Thresholds, caps and model assignments for the orchestration core. Every
// section defaults independently so a config file only needs the keys it
// changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Intent classification thresholds
    pub triage: TriageConfig,
    /// Producer/reviewer loop settings
    pub refinement: RefinementConfig,
    /// Shared state capacities
    pub blackboard: BlackboardConfig,
    /// Strategy and execution settings
    pub execution: ExecutionConfig,
    /// Model per tier
    pub models: ModelsConfig,
}

/// Intent classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Escalate when the fast pass is less confident than this
    pub escalation_confidence_threshold: f32,
    /// Escalate reasoning-heavy requests below this confidence
    pub escalation_reasoning_threshold: f32,
    /// Run deep analysis below this confidence
    pub deep_analysis_threshold: f32,
    /// Validation rejects analyses below this confidence
    pub min_valid_confidence: f32,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            escalation_confidence_threshold: 0.7,
            escalation_reasoning_threshold: 0.8,
            deep_analysis_threshold: 0.75,
            min_valid_confidence: 0.5,
        }
    }
}

/// Producer/reviewer loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Revisions allowed after the initial draft
    pub max_iterations: u32,
    /// Minimum reviewer score (0-10) for approval
    pub quality_threshold: f32,
    /// Drafts generated in best-of-N mode
    pub best_of_n: usize,
    /// Draft characters sent to the reviewer
    pub max_review_chars: usize,
    /// Existing section characters sent to the producer
    pub max_context_chars: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            quality_threshold: 7.0,
            best_of_n: 3,
            max_review_chars: 3000,
            max_context_chars: 2000,
        }
    }
}

/// Shared state capacities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    /// Inter-agent messages kept before the oldest are evicted
    pub message_log_capacity: usize,
    /// Conversation turns returned by a "recent" read
    pub recent_messages: usize,
    /// Patterns kept before the weakest are pruned
    pub pattern_capacity: usize,
    /// Allocation records kept
    pub allocation_history_capacity: usize,
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            message_log_capacity: 1000,
            recent_messages: 10,
            pattern_capacity: 500,
            allocation_history_capacity: 100,
        }
    }
}

/// Strategy and execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Item count at which the parallel strategy is chosen
    pub parallel_min_items: usize,
    /// Work items running at once within a batch
    pub max_concurrency: usize,
    /// Route quality-sensitive writing through the refinement cluster
    pub enable_critic: bool,
    /// Budget for the strategy reasoner before falling back
    pub strategy_timeout_secs: u64,
    /// Consult the LLM strategy reasoner at all
    pub use_reasoner: bool,
    /// How long a work item waits for an idle worker
    pub allocation_wait_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel_min_items: 3,
            max_concurrency: 4,
            enable_critic: true,
            strategy_timeout_secs: 20,
            use_reasoner: false,
            allocation_wait_ms: 2000,
        }
    }
}

/// Model per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Provider name ("claude" or "mock")
    pub provider: String,
    /// Model serving the fast tier
    pub fast: String,
    /// Model serving the smart tier
    pub smart: String,
    /// Model serving the creative tier
    pub creative: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            fast: "claude-3-5-haiku-20241022".to_string(),
            smart: "claude-sonnet-4-20250514".to_string(),
            creative: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    ///
    /// The content may be a bare config or wrapped in an `[orchestrator]` table.
    ///
    /// # Errors
    /// Returns error if the TOML cannot be parsed or a value is out of range
    pub fn from_toml_str(toml_content: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(toml_content)?;
        let section = value.get("orchestrator").cloned().unwrap_or(value);
        let config: Self = section.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration under an `[orchestrator]` table
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        #[derive(Serialize)]
        struct ConfigWrapper<'a> {
            orchestrator: &'a OrchestratorConfig,
        }

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(&ConfigWrapper { orchestrator: self })?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Default config location, `~/.scribe/orchestrator.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".scribe").join("orchestrator.toml"))
    }

    /// Checks that every value is in range
    ///
    /// # Errors
    /// Returns the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &'static str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason: format!("{value} is outside [0, 1]") })
            }
        };
        let positive = |field: &'static str, value: usize| {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason: "must be greater than zero".to_string() })
            }
        };

        unit("triage.escalation_confidence_threshold", self.triage.escalation_confidence_threshold)?;
        unit("triage.escalation_reasoning_threshold", self.triage.escalation_reasoning_threshold)?;
        unit("triage.deep_analysis_threshold", self.triage.deep_analysis_threshold)?;
        unit("triage.min_valid_confidence", self.triage.min_valid_confidence)?;

        if !(0.0..=10.0).contains(&self.refinement.quality_threshold) {
            return Err(ConfigError::Invalid {
                field: "refinement.quality_threshold",
                reason: format!("{} is outside [0, 10]", self.refinement.quality_threshold),
            });
        }
        positive("refinement.max_iterations", self.refinement.max_iterations as usize)?;
        positive("refinement.best_of_n", self.refinement.best_of_n)?;
        positive("blackboard.message_log_capacity", self.blackboard.message_log_capacity)?;
        positive("blackboard.pattern_capacity", self.blackboard.pattern_capacity)?;
        positive("blackboard.allocation_history_capacity", self.blackboard.allocation_history_capacity)?;
        positive("execution.parallel_min_items", self.execution.parallel_min_items)?;
        positive("execution.max_concurrency", self.execution.max_concurrency)?;
        Ok(())
    }
}
