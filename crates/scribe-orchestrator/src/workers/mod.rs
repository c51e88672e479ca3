//! Worker pool: typed producers and reviewers with capabilities and history.

mod registry;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use registry::{AllocationRecord, CompletionRecord, RegistryStats, WorkerRegistry};

/// What a worker does in a producer/reviewer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Produces artifacts (drafts, structures, answers).
    Producer,
    /// Reviews artifacts.
    Reviewer,
    /// Applies side effects through tools (navigation, open, delete).
    Operator,
}

/// Availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready for allocation.
    Idle,
    /// Holding exactly one task.
    Busy,
    /// Not accepting work.
    Offline,
}

/// Historical performance of a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerPerformance {
    /// Allocations received.
    pub tasks_assigned: u32,
    /// Tasks finished successfully.
    pub tasks_completed: u32,
    /// Tasks that failed.
    pub tasks_failed: u32,
    /// Mean wall time of finished tasks, in seconds.
    pub avg_execution_secs: Option<f64>,
    /// Accumulated cost.
    pub total_cost: f64,
    /// Accumulated tokens.
    pub total_tokens: u64,
}

impl WorkerPerformance {
    fn record(&mut self, success: bool, execution_secs: f64, cost: f64, tokens: u64) {
        let finished_before = f64::from(self.tasks_completed + self.tasks_failed);
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let previous = self.avg_execution_secs.unwrap_or(0.0);
        self.avg_execution_secs = Some(previous.mul_add(finished_before, execution_secs) / (finished_before + 1.0));
        self.total_cost += cost;
        self.total_tokens += tokens;
    }
}

/// A typed executor in the pool.
///
/// `status == Busy` holds exactly when `current_task` is set; only the
/// registry mutates either field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique id.
    pub id: String,
    /// Role.
    pub role: WorkerRole,
    /// Task types this worker accepts.
    pub capabilities: BTreeSet<String>,
    /// Availability.
    pub status: WorkerStatus,
    /// Task currently held.
    pub current_task: Option<String>,
    /// History.
    pub performance: WorkerPerformance,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    /// Creates an idle worker.
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, role: WorkerRole, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            role,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: WorkerStatus::Idle,
            current_task: None,
            performance: WorkerPerformance::default(),
            registered_at: Utc::now(),
        }
    }

    /// Returns true if this worker accepts `task_type`.
    #[must_use]
    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    /// Returns true if the worker is idle and accepts `task_type`.
    #[must_use]
    pub fn is_available_for(&self, task_type: &str) -> bool {
        self.status == WorkerStatus::Idle && self.can_handle(task_type)
    }
}

/// The pool registered by default: enough writers for a full parallel batch
/// plus one specialist per remaining task type.
#[must_use]
pub fn default_pool(writers: usize) -> Vec<Worker> {
    let mut pool: Vec<Worker> = (1..=writers.max(1))
        .map(|n| Worker::new(format!("writer-{n}"), WorkerRole::Producer, ["generate_content"]))
        .collect();
    pool.extend([
        Worker::new("editor-1", WorkerRole::Producer, ["improve_content", "generate_content"]),
        Worker::new("architect-1", WorkerRole::Producer, ["generate_structure", "modify_structure"]),
        Worker::new("critic-1", WorkerRole::Reviewer, ["review_content"]),
        Worker::new("navigator-1", WorkerRole::Operator, ["select_section", "open_document", "delete_node"]),
        Worker::new("concierge-1", WorkerRole::Operator, ["request_clarification"]),
    ]);
    pool
}
