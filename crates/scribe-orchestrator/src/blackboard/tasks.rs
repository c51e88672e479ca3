//! Work items held in the blackboard's task queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::{Action, ActionKind, Priority};

/// Lifecycle of a work item. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued.
    Pending,
    /// Executing on a worker.
    Running,
    /// Finished with output.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a cancellation signal. Never retried.
    Cancelled,
}

impl TaskStatus {
    /// Checks if a task may move from `self` to `to`.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Returns true for completed, failed and cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits attached to a work item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConstraints {
    /// Route through the producer/reviewer loop.
    pub requires_review: bool,
    /// Revision cap when reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

/// What a finished work item produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Generated text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Words in `content`.
    pub word_count: usize,
    /// Reviewer score when reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Reviewer approval when reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    /// Producer calls made.
    pub iterations: u32,
    /// Tokens spent.
    pub tokens: u64,
    /// Cost attributed.
    pub cost: f64,
    /// Tool metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TaskOutput {
    /// Output carrying generated text.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self { word_count: content.split_whitespace().count(), content: Some(content), iterations: 1, ..Self::default() }
    }
}

/// How a work item ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Success.
    Completed(TaskOutput),
    /// Failure with a reason.
    Failed(String),
}

/// A result handed to the blackboard by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    /// Task id.
    pub task_id: String,
    /// How it ended.
    pub outcome: TaskOutcome,
    /// Wall time in seconds.
    pub execution_secs: f64,
}

/// One unit of delegated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id (the id of the action it came from).
    pub id: String,
    /// Orchestration session.
    pub session_id: String,
    /// Typed payload.
    pub action: ActionKind,
    /// Ids that must complete first.
    pub dependencies: Vec<String>,
    /// Existing content the work builds on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Limits.
    pub constraints: TaskConstraints,
    /// Scheduling priority.
    pub priority: Priority,
    /// Worker holding the task.
    pub assigned_worker: Option<String>,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Allocation time.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    /// Reason on failure or cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Builds a pending work item from a planned action.
    #[must_use]
    pub fn from_action(session_id: impl Into<String>, action: &Action) -> Self {
        Self {
            id: action.id.clone(),
            session_id: session_id.into(),
            action: action.kind.clone(),
            dependencies: action.depends_on.clone(),
            context: None,
            constraints: TaskConstraints::default(),
            priority: action.priority,
            assigned_worker: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }

    /// Attaches existing content.
    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Replaces the constraints.
    #[must_use]
    pub fn with_constraints(mut self, constraints: TaskConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Capability a worker needs to take this task.
    #[must_use]
    pub fn task_type(&self) -> &'static str {
        self.action.task_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_move_forward() {
        use TaskStatus::{Cancelled, Completed, Failed, Pending, Running};

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn test_text_output_counts_words() {
        let output = TaskOutput::text("The rain fell softly.");
        assert_eq!(output.word_count, 4);
        assert_eq!(output.iterations, 1);
    }
}
