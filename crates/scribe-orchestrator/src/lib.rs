//! Orchestration core for Scribe.
//!
//! Turns a user's natural-language request about a document into planned
//! actions, decides how to run them, and executes them through a shared
//! blackboard, a DAG executor and an optional producer/reviewer loop.

pub mod actions;
pub mod blackboard;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod dag;
pub mod decode;
pub mod documents;
pub mod error;
pub mod events;
pub mod intent;
pub mod strategy;
pub mod tools;
pub mod workers;

pub use actions::{Action, ActionKind, ActionPlanner, ContentPurpose, Precondition, Priority};
pub use blackboard::{
    Blackboard, BlackboardStats, Channel, ConversationMessage, CoordinatorToken, SharedBlackboard, Task, TaskStatus,
    COORDINATOR_ID,
};
pub use cluster::{Critique, DraftRequest, Producer, RefinementCluster, RefinementOutcome, RefinementSettings, Reviewer};
pub use config::{BlackboardConfig, ExecutionConfig, ModelsConfig, OrchestratorConfig, RefinementConfig, TriageConfig};
pub use coordinator::{OrchestrateRequest, OrchestrateResponse, Orchestrator, OrchestratorBuilder, SectionResult};
pub use dag::{DagExecutor, DagRun, NodeOutcome, TaskDag};
pub use documents::{Document, DocumentSnapshot, DocumentStateProvider, InMemoryDocuments, Section};
pub use error::{BlackboardError, ConfigError, DagError, OrchestrationError, Result, ToolError};
pub use events::{TraceEvent, TraceMetrics, TraceReporter};
pub use intent::{Intent, IntentAnalysis, IntentPipeline, PipelineContext};
pub use strategy::{ExecutionStrategy, StrategyReasoner, StrategySelector};
pub use tools::{RecordingToolExecutor, ToolContext, ToolExecutor, ToolOutcome};
pub use workers::{AllocationRecord, Worker, WorkerRole, WorkerStatus};
