// Error types for orchestration

use thiserror::Error;

use crate::blackboard::TaskStatus;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Shared state store rejected an operation
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    /// Work items could not be arranged into batches
    #[error(transparent)]
    Dag(#[from] DagError),

    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A side-effecting tool call failed
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] scribe_abstraction::ModelError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Orchestration cancelled
    #[error("Orchestration cancelled")]
    Cancelled,
}

/// Errors raised by the blackboard.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlackboardError {
    /// The caller does not hold this blackboard's coordinator token.
    #[error("caller is not the coordinator of this blackboard")]
    Unauthorized,

    /// A task with this id already exists.
    #[error("task already exists: {0}")]
    DuplicateTask(String),

    /// No task with this id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// No agent with this id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// An agent with this id is already registered.
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// The agent holds a task and cannot be changed or removed.
    #[error("agent is busy: {0}")]
    AgentBusy(String),

    /// Busy is only entered through allocation.
    #[error("agent {0} cannot be set busy directly")]
    InvalidAgentStatus(String),

    /// The agent does not hold the task it is reporting on.
    #[error("agent {agent_id} does not hold task {task_id}")]
    TaskNotHeld {
        /// Agent id
        agent_id: String,
        /// Task id
        task_id: String,
    },

    /// A task status may only move forward.
    #[error("invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task id
        task_id: String,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// No pattern with this id.
    #[error("pattern not found: {0}")]
    PatternNotFound(String),
}

/// Errors raised while building an execution order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    /// Some nodes can never become ready.
    #[error("dependency cycle or deadlock among: {}", stuck.join(", "))]
    CycleDetected {
        /// Ids of every node that could not be scheduled, sorted.
        stuck: Vec<String>,
    },

    /// A node names a dependency that is not part of the request.
    #[error("work item {node} depends on unknown item {dependency}")]
    DependencyNotFound {
        /// Dependent node
        node: String,
        /// Missing dependency
        dependency: String,
    },

    /// Two work items share an id.
    #[error("duplicate work item id: {0}")]
    DuplicateNode(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized.
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Tool execution errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No tool with this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran and reported failure.
    #[error("tool '{tool}' failed: {reason}")]
    Failed {
        /// Tool name
        tool: String,
        /// Failure text reported by the tool
        reason: String,
    },
}

impl OrchestrationError {
    /// A short, user-facing hint on how to recover from this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Dag(DagError::CycleDetected { .. }) => {
                "Some requested steps depend on each other in a loop. Try asking for them one at a time."
            }
            Self::Dag(_) => "Part of the request refers to a step that does not exist. Try rephrasing it.",
            Self::Config(_) => "Check the orchestrator configuration file and try again.",
            Self::Cancelled => "The request was cancelled. Send it again when ready.",
            Self::Model(_) => "The writing model is unavailable right now. Please try again shortly.",
            Self::Blackboard(_) | Self::Tool(_) | Self::Json(_) => {
                "Something went wrong while applying the request. Please try again."
            }
        }
    }
}
