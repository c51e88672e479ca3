//! Trace events for orchestration runs.
//!
//! Every stage outcome is published as a [`TraceEvent`] on a broadcast
//! channel so callers can follow a run live, and the reporter keeps running
//! totals for a cheap snapshot.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::intent::Intent;
use crate::strategy::ExecutionStrategy;

const DEFAULT_CAPACITY: usize = 256;

/// Trace event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// The intent pipeline settled on an intent.
    IntentResolved {
        /// Final intent.
        intent: Intent,
        /// Final confidence.
        confidence: f32,
        /// Triage escalated to the smart tier.
        escalated: bool,
        /// Deep analysis ran.
        deep_analysis: bool,
    },
    /// Validation changed or questioned the analysis.
    ValidationIssue {
        /// What the rule reported.
        message: String,
        /// The user has to answer.
        blocking: bool,
    },
    /// Actions were dropped because their precondition does not hold yet.
    ActionsFiltered {
        /// Dropped action ids.
        action_ids: Vec<String>,
        /// Why.
        reason: String,
    },
    /// An execution strategy was chosen.
    StrategySelected {
        /// Strategy.
        strategy: ExecutionStrategy,
        /// The reasoner (not the fallback policy) chose it.
        from_reasoner: bool,
        /// Work items it applies to.
        items: usize,
    },
    /// A DAG batch started.
    BatchStarted {
        /// Zero-based batch index.
        index: usize,
        /// Task ids in the batch.
        task_ids: Vec<String>,
    },
    /// A DAG batch finished.
    BatchFinished {
        /// Zero-based batch index.
        index: usize,
        /// Items that succeeded.
        succeeded: usize,
        /// Items that failed or were skipped.
        failed: usize,
    },
    /// A task was handed to a worker.
    TaskStarted {
        /// Task id.
        task_id: String,
        /// Worker id.
        worker_id: String,
    },
    /// A task completed.
    TaskCompleted {
        /// Task id.
        task_id: String,
        /// Tokens spent.
        tokens: u64,
        /// Wall time in milliseconds.
        duration_ms: u64,
    },
    /// A task failed.
    TaskFailed {
        /// Task id.
        task_id: String,
        /// Error message.
        error: String,
    },
    /// A task was cancelled.
    TaskCancelled {
        /// Task id.
        task_id: String,
    },
    /// No idle capable worker was found.
    AllocationMissed {
        /// Task id.
        task_id: String,
        /// Task type.
        task_type: String,
    },
    /// One producer/reviewer round finished.
    RefinementIteration {
        /// Task the artifact belongs to.
        task_id: String,
        /// Iteration number, starting at 1.
        iteration: u32,
        /// Reviewer score.
        score: f32,
        /// The artifact was approved.
        approved: bool,
    },
}

impl TraceEvent {
    /// One-line summary used for the inter-agent log.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::IntentResolved { intent, confidence, .. } => format!("intent {intent} ({confidence:.2})"),
            Self::ValidationIssue { message, .. } => format!("validation: {message}"),
            Self::ActionsFiltered { action_ids, reason } => format!("filtered {} action(s): {reason}", action_ids.len()),
            Self::StrategySelected { strategy, items, .. } => format!("strategy {strategy} for {items} item(s)"),
            Self::BatchStarted { index, task_ids } => format!("batch {index} started with {} item(s)", task_ids.len()),
            Self::BatchFinished { index, succeeded, failed } => {
                format!("batch {index} finished: {succeeded} ok, {failed} failed")
            }
            Self::TaskStarted { task_id, worker_id } => format!("{task_id} started on {worker_id}"),
            Self::TaskCompleted { task_id, tokens, .. } => format!("{task_id} completed ({tokens} tokens)"),
            Self::TaskFailed { task_id, error } => format!("{task_id} failed: {error}"),
            Self::TaskCancelled { task_id } => format!("{task_id} cancelled"),
            Self::AllocationMissed { task_id, task_type } => format!("no idle worker for {task_id} ({task_type})"),
            Self::RefinementIteration { task_id, iteration, score, approved } => {
                format!("{task_id} iteration {iteration}: score {score:.1}, approved {approved}")
            }
        }
    }
}

/// Running totals over emitted events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceMetrics {
    /// Tasks completed.
    pub completed_tasks: usize,
    /// Tasks failed.
    pub failed_tasks: usize,
    /// Tasks cancelled.
    pub cancelled_tasks: usize,
    /// Tokens reported by completed tasks.
    pub total_tokens: u64,
    /// Refinement iterations run.
    pub refinement_iterations: usize,
    /// Allocation misses.
    pub allocation_misses: usize,
}

/// Broadcasts trace events.
#[derive(Debug)]
pub struct TraceReporter {
    broadcast_tx: broadcast::Sender<TraceEvent>,
    metrics: Mutex<TraceMetrics>,
}

impl Default for TraceReporter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TraceReporter {
    /// Creates a reporter buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self { broadcast_tx, metrics: Mutex::new(TraceMetrics::default()) }
    }

    /// Subscribes to trace events.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Current totals.
    pub fn snapshot(&self) -> TraceMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Publishes `event`.
    pub fn emit(&self, event: TraceEvent) {
        {
            let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            match &event {
                TraceEvent::TaskCompleted { tokens, .. } => {
                    metrics.completed_tasks += 1;
                    metrics.total_tokens += tokens;
                }
                TraceEvent::TaskFailed { .. } => metrics.failed_tasks += 1,
                TraceEvent::TaskCancelled { .. } => metrics.cancelled_tasks += 1,
                TraceEvent::RefinementIteration { .. } => metrics.refinement_iterations += 1,
                TraceEvent::AllocationMissed { .. } => metrics.allocation_misses += 1,
                _ => {}
            }
        }
        debug!(event = %event.summary(), "Trace event");
        // No subscribers is fine.
        let _ = self.broadcast_tx.send(event);
    }
}
