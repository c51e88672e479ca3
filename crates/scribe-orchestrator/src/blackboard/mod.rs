//! Blackboard: the shared state store for one orchestration scope.
//!
//! Holds the conversation log, the task queue, the worker pool, pattern
//! memory and the inter-agent message log. Components receive the store by
//! `Arc` injection; there is no process-wide instance.
//!
//! The task queue has a single writer. [`Blackboard::with_coordinator`]
//! hands out the only [`CoordinatorToken`] for a board, and every queue
//! mutation checks that the presented token was minted by this board.

mod a2a;
mod conversation;
mod patterns;
mod tasks;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use a2a::{A2AMessage, A2AMessageType};
pub use conversation::{ConversationMessage, MessageKind, MessageMetadata, MessageRole};
pub use patterns::{ema_update, Pattern, LEARNING_RATE, MIN_LEARNING_CONFIDENCE};
pub use tasks::{Task, TaskConstraints, TaskOutcome, TaskOutput, TaskReport, TaskStatus};

use a2a::MessageLog;
use patterns::PatternMemory;

use crate::config::BlackboardConfig;
use crate::error::BlackboardError;
use crate::workers::{AllocationRecord, CompletionRecord, RegistryStats, Worker, WorkerRegistry, WorkerStatus};

const EVENT_BUFFER: usize = 256;
/// Sender and recipient id the coordinator uses in the inter-agent log.
pub const COORDINATOR_ID: &str = "coordinator";

/// Proof of coordinator authority over one blackboard.
///
/// Not `Clone`; only [`Blackboard::with_coordinator`] creates one.
#[derive(Debug)]
pub struct CoordinatorToken {
    board_id: Uuid,
}

/// Named subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Conversation turns and inter-agent messages.
    Messages,
    /// Task queue changes.
    Tasks,
    /// Worker changes.
    Agents,
    /// Pattern memory changes.
    Patterns,
    /// Everything.
    All,
}

/// A state change published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlackboardEvent {
    /// A conversation turn was appended.
    MessageAppended {
        /// Message id
        message_id: String,
        /// Author
        role: MessageRole,
    },
    /// An inter-agent message was logged.
    AgentMessage {
        /// Message id
        message_id: String,
        /// Kind
        kind: A2AMessageType,
    },
    /// A task was queued or changed status.
    TaskUpdated {
        /// Task id
        task_id: String,
        /// New status
        status: TaskStatus,
    },
    /// A worker was registered or changed status.
    AgentUpdated {
        /// Worker id
        agent_id: String,
        /// New status
        status: WorkerStatus,
    },
    /// A pattern was learned or its success rate changed.
    PatternUpdated {
        /// Pattern id
        pattern_id: String,
        /// Current success rate
        success_rate: f64,
    },
}

impl BlackboardEvent {
    /// Channel this event is published on (besides `All`).
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::MessageAppended { .. } | Self::AgentMessage { .. } => Channel::Messages,
            Self::TaskUpdated { .. } => Channel::Tasks,
            Self::AgentUpdated { .. } => Channel::Agents,
            Self::PatternUpdated { .. } => Channel::Patterns,
        }
    }
}

/// Receiver filtered to one channel.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    receiver: broadcast::Receiver<BlackboardEvent>,
}

impl Subscription {
    fn accepts(&self, event: &BlackboardEvent) -> bool {
        self.channel == Channel::All || event.channel() == self.channel
    }

    /// Waits for the next event on this channel. `None` once the board is dropped.
    pub async fn recv(&mut self) -> Option<BlackboardEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = ?self.channel, skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next already-published event on this channel, if any.
    pub fn try_recv(&mut self) -> Option<BlackboardEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Counts by task status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Pending tasks.
    pub pending: usize,
    /// Running tasks.
    pub running: usize,
    /// Completed tasks.
    pub completed: usize,
    /// Failed tasks.
    pub failed: usize,
    /// Cancelled tasks.
    pub cancelled: usize,
}

/// Blackboard summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlackboardStats {
    /// Conversation turns.
    pub conversation_messages: usize,
    /// Inter-agent messages currently retained.
    pub agent_messages: usize,
    /// Inter-agent messages evicted so far.
    pub agent_messages_evicted: u64,
    /// Tasks by status.
    pub tasks: TaskCounts,
    /// Worker pool summary.
    pub workers: RegistryStats,
    /// Patterns retained.
    pub patterns: usize,
}

#[derive(Debug, Default)]
struct TaskQueue {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

/// The shared state store.
pub struct Blackboard {
    id: Uuid,
    config: BlackboardConfig,
    conversation: RwLock<Vec<ConversationMessage>>,
    queue: RwLock<TaskQueue>,
    workers: WorkerRegistry,
    patterns: RwLock<PatternMemory>,
    messages: RwLock<MessageLog>,
    events: broadcast::Sender<BlackboardEvent>,
}

impl fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blackboard")
            .field("id", &self.id)
            .field("conversation", &self.conversation.try_read().map(|c| c.len()).unwrap_or(0))
            .field("tasks", &self.queue.try_read().map(|q| q.tasks.len()).unwrap_or(0))
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Blackboard {
    /// Creates a board and the single token allowed to write its task queue.
    #[must_use]
    pub fn with_coordinator(config: BlackboardConfig) -> (Self, CoordinatorToken) {
        let id = Uuid::new_v4();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let board = Self {
            id,
            conversation: RwLock::new(Vec::new()),
            queue: RwLock::new(TaskQueue::default()),
            workers: WorkerRegistry::new(config.allocation_history_capacity),
            patterns: RwLock::new(PatternMemory::new(config.pattern_capacity)),
            messages: RwLock::new(MessageLog::new(config.message_log_capacity)),
            events,
            config,
        };
        (board, CoordinatorToken { board_id: id })
    }

    fn authorize(&self, token: &CoordinatorToken) -> Result<(), BlackboardError> {
        if token.board_id == self.id {
            Ok(())
        } else {
            warn!(board = %self.id, "Rejected task queue write from non-coordinator");
            Err(BlackboardError::Unauthorized)
        }
    }

    fn publish(&self, event: BlackboardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Subscribes to one channel.
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        Subscription { channel, receiver: self.events.subscribe() }
    }

    /// Direct access to the worker pool for scoring and inspection.
    pub const fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    // ---- conversation -------------------------------------------------

    /// Appends a conversation turn.
    pub async fn append_message(&self, message: ConversationMessage) {
        let event = BlackboardEvent::MessageAppended { message_id: message.id.clone(), role: message.role };
        self.conversation.write().await.push(message);
        self.publish(event);
    }

    /// The last `n` turns, oldest first. `None` uses the configured default.
    pub async fn recent_messages(&self, n: Option<usize>) -> Vec<ConversationMessage> {
        let n = n.unwrap_or(self.config.recent_messages);
        let log = self.conversation.read().await;
        log[log.len().saturating_sub(n)..].to_vec()
    }

    // ---- task queue ---------------------------------------------------

    /// Queues a new task.
    ///
    /// # Errors
    /// `Unauthorized` for a foreign token, `DuplicateTask` for a reused id.
    pub async fn assign_task(&self, token: &CoordinatorToken, task: Task) -> Result<(), BlackboardError> {
        self.authorize(token)?;
        let mut queue = self.queue.write().await;
        if queue.tasks.contains_key(&task.id) {
            return Err(BlackboardError::DuplicateTask(task.id));
        }

        debug!(task_id = %task.id, task_type = task.task_type(), "Task queued");
        let event = BlackboardEvent::TaskUpdated { task_id: task.id.clone(), status: task.status };
        queue.order.push(task.id.clone());
        queue.tasks.insert(task.id.clone(), task);
        drop(queue);

        self.publish(event);
        Ok(())
    }

    /// Places a queued task on the best idle worker.
    ///
    /// `Ok(None)` means no capable worker is idle right now.
    ///
    /// # Errors
    /// `Unauthorized` or `TaskNotFound`.
    pub async fn allocate(
        &self,
        token: &CoordinatorToken,
        task_id: &str,
        wait: std::time::Duration,
    ) -> Result<Option<AllocationRecord>, BlackboardError> {
        self.authorize(token)?;
        let task_type = self.task(task_id).await.ok_or_else(|| BlackboardError::TaskNotFound(task_id.to_string()))?.task_type();

        let Some(record) = self.workers.allocate_or_wait(task_id, task_type, wait).await else {
            return Ok(None);
        };

        {
            let mut queue = self.queue.write().await;
            if let Some(task) = queue.tasks.get_mut(task_id) {
                task.assigned_worker = Some(record.worker_id.clone());
                task.assigned_at = Some(record.allocated_at);
            }
        }

        self.publish(BlackboardEvent::AgentUpdated { agent_id: record.worker_id.clone(), status: WorkerStatus::Busy });
        self.log_agent_message(A2AMessage::new(
            self.session_of(task_id).await,
            COORDINATOR_ID,
            record.worker_id.clone(),
            A2AMessageType::Task,
            serde_json::json!({ "task_id": task_id, "task_type": task_type, "score": record.score }),
        ))
        .await;
        Ok(Some(record))
    }

    /// Marks a pending task running.
    ///
    /// # Errors
    /// `Unauthorized`, `TaskNotFound` or `InvalidTransition`.
    pub async fn start_task(&self, token: &CoordinatorToken, task_id: &str) -> Result<(), BlackboardError> {
        self.authorize(token)?;
        self.transition(task_id, TaskStatus::Running, |task| task.started_at = Some(Utc::now())).await
    }

    /// Records a finished task.
    ///
    /// Marks the task completed or failed, credits the assigned worker,
    /// returns it to idle and logs a result message, all before returning.
    ///
    /// # Errors
    /// `Unauthorized`, `TaskNotFound` or `InvalidTransition`.
    pub async fn report_result(&self, token: &CoordinatorToken, report: TaskReport) -> Result<Task, BlackboardError> {
        self.authorize(token)?;
        let mut queue = self.queue.write().await;
        let task = queue.tasks.get_mut(&report.task_id).ok_or_else(|| BlackboardError::TaskNotFound(report.task_id.clone()))?;

        let (status, success) = match &report.outcome {
            TaskOutcome::Completed(_) => (TaskStatus::Completed, true),
            TaskOutcome::Failed(_) => (TaskStatus::Failed, false),
        };
        if !task.status.can_transition_to(status) {
            return Err(BlackboardError::InvalidTransition { task_id: task.id.clone(), from: task.status, to: status });
        }

        let (cost, tokens) = match &report.outcome {
            TaskOutcome::Completed(output) => (output.cost, output.tokens),
            TaskOutcome::Failed(_) => (0.0, 0),
        };
        if let Some(worker_id) = task.assigned_worker.clone() {
            let record = CompletionRecord { success, execution_secs: report.execution_secs, cost, tokens };
            match self.workers.complete(&worker_id, &task.id, record).await {
                Ok(_) => self.publish(BlackboardEvent::AgentUpdated { agent_id: worker_id, status: WorkerStatus::Idle }),
                Err(err) => warn!(task_id = %task.id, error = %err, "Worker bookkeeping skipped"),
            }
        }

        task.status = status;
        task.completed_at = Some(Utc::now());
        let payload = match report.outcome {
            TaskOutcome::Completed(output) => {
                let payload = serde_json::json!({ "task_id": task.id, "status": status, "word_count": output.word_count });
                task.output = Some(output);
                payload
            }
            TaskOutcome::Failed(reason) => {
                let payload = serde_json::json!({ "task_id": task.id, "status": status, "error": reason });
                task.error = Some(reason);
                payload
            }
        };
        let snapshot = task.clone();
        drop(queue);

        info!(task_id = %snapshot.id, status = %status, "Task finished");
        self.publish(BlackboardEvent::TaskUpdated { task_id: snapshot.id.clone(), status });
        self.log_agent_message(A2AMessage::new(
            snapshot.session_id.clone(),
            snapshot.assigned_worker.clone().unwrap_or_else(|| COORDINATOR_ID.to_string()),
            COORDINATOR_ID,
            A2AMessageType::Result,
            payload,
        ))
        .await;
        Ok(snapshot)
    }

    /// Marks a task cancelled and frees its worker without crediting it.
    ///
    /// # Errors
    /// `Unauthorized`, `TaskNotFound` or `InvalidTransition`.
    pub async fn cancel_task(&self, token: &CoordinatorToken, task_id: &str, reason: &str) -> Result<(), BlackboardError> {
        self.authorize(token)?;
        let mut worker = None;
        self.transition(task_id, TaskStatus::Cancelled, |task| {
            task.completed_at = Some(Utc::now());
            task.error = Some(reason.to_string());
            worker = task.assigned_worker.clone();
        })
        .await?;

        if let Some(worker_id) = worker {
            match self.workers.release(&worker_id, task_id).await {
                Ok(_) => self.publish(BlackboardEvent::AgentUpdated { agent_id: worker_id, status: WorkerStatus::Idle }),
                Err(err) => debug!(task_id = %task_id, error = %err, "No worker to release"),
            }
        }
        Ok(())
    }

    async fn transition<F>(&self, task_id: &str, to: TaskStatus, apply: F) -> Result<(), BlackboardError>
    where
        F: FnOnce(&mut Task),
    {
        let mut queue = self.queue.write().await;
        let task = queue.tasks.get_mut(task_id).ok_or_else(|| BlackboardError::TaskNotFound(task_id.to_string()))?;
        if !task.status.can_transition_to(to) {
            return Err(BlackboardError::InvalidTransition { task_id: task_id.to_string(), from: task.status, to });
        }
        task.status = to;
        apply(task);
        drop(queue);

        self.publish(BlackboardEvent::TaskUpdated { task_id: task_id.to_string(), status: to });
        Ok(())
    }

    async fn session_of(&self, task_id: &str) -> String {
        self.queue.read().await.tasks.get(task_id).map(|t| t.session_id.clone()).unwrap_or_default()
    }

    /// Snapshot of one task.
    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.queue.read().await.tasks.get(task_id).cloned()
    }

    /// Every task in queue order.
    pub async fn tasks(&self) -> Vec<Task> {
        let queue = self.queue.read().await;
        queue.order.iter().filter_map(|id| queue.tasks.get(id).cloned()).collect()
    }

    /// Tasks with the given status, in queue order.
    pub async fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.tasks().await.into_iter().filter(|t| t.status == status).collect()
    }

    // ---- workers ------------------------------------------------------

    /// Registers a worker.
    ///
    /// # Errors
    /// `DuplicateAgent` if the id is taken.
    pub async fn register_agent(&self, worker: Worker) -> Result<(), BlackboardError> {
        let agent_id = worker.id.clone();
        self.workers.register(worker).await?;
        self.publish(BlackboardEvent::AgentUpdated { agent_id, status: WorkerStatus::Idle });
        Ok(())
    }

    /// Moves a worker between idle and offline.
    ///
    /// # Errors
    /// See [`WorkerRegistry::set_status`].
    pub async fn update_agent_state(&self, agent_id: &str, status: WorkerStatus) -> Result<Worker, BlackboardError> {
        let worker = self.workers.set_status(agent_id, status).await?;
        self.publish(BlackboardEvent::AgentUpdated { agent_id: agent_id.to_string(), status });
        Ok(worker)
    }

    /// Snapshot of one worker.
    pub async fn get_agent_state(&self, agent_id: &str) -> Option<Worker> {
        self.workers.get(agent_id).await
    }

    /// Every worker in registration order.
    pub async fn get_all_agents(&self) -> Vec<Worker> {
        self.workers.all().await
    }

    /// Idle workers accepting `task_type`.
    pub async fn idle_agents_for(&self, task_type: &str) -> Vec<Worker> {
        self.workers.find_capable(task_type).await
    }

    // ---- pattern memory -----------------------------------------------

    /// Learns a pattern when `confidence` is high enough. Returns its id.
    pub async fn learn_pattern(&self, namespace: &str, pattern: &str, action: &str, confidence: f64) -> Option<String> {
        if confidence < MIN_LEARNING_CONFIDENCE {
            debug!(namespace, confidence, "Observation below learning confidence");
            return None;
        }
        let id = self.patterns.write().await.record(namespace, pattern, action, confidence);
        let success_rate = self.patterns.read().await.get(&id).map_or(confidence, |p| p.success_rate);
        self.publish(BlackboardEvent::PatternUpdated { pattern_id: id.clone(), success_rate });
        Some(id)
    }

    /// Applies success or failure feedback to a pattern.
    ///
    /// # Errors
    /// `PatternNotFound`.
    pub async fn record_pattern_outcome(&self, pattern_id: &str, success: bool) -> Result<f64, BlackboardError> {
        let rate = self
            .patterns
            .write()
            .await
            .record_outcome(pattern_id, success)
            .ok_or_else(|| BlackboardError::PatternNotFound(pattern_id.to_string()))?;
        self.publish(BlackboardEvent::PatternUpdated { pattern_id: pattern_id.to_string(), success_rate: rate });
        Ok(rate)
    }

    /// Patterns whose text overlaps `query`, best first.
    pub async fn query_patterns(&self, namespace: Option<&str>, query: &str, limit: usize) -> Vec<Pattern> {
        self.patterns.read().await.query(namespace, query, limit)
    }

    /// Snapshot of one pattern.
    pub async fn pattern(&self, pattern_id: &str) -> Option<Pattern> {
        self.patterns.read().await.get(pattern_id).cloned()
    }

    // ---- inter-agent log ----------------------------------------------

    /// Appends to the bounded inter-agent log.
    pub async fn log_agent_message(&self, message: A2AMessage) {
        let event = BlackboardEvent::AgentMessage { message_id: message.id.clone(), kind: message.kind };
        self.messages.write().await.push(message);
        self.publish(event);
    }

    /// The last `n` inter-agent messages, oldest first.
    pub async fn recent_agent_messages(&self, n: usize) -> Vec<A2AMessage> {
        self.messages.read().await.recent(n)
    }

    /// Inter-agent messages for one session.
    pub async fn session_agent_messages(&self, session_id: &str) -> Vec<A2AMessage> {
        self.messages.read().await.for_session(session_id)
    }

    // ---- inspection ---------------------------------------------------

    /// Board summary.
    pub async fn stats(&self) -> BlackboardStats {
        let mut tasks = TaskCounts::default();
        for task in self.queue.read().await.tasks.values() {
            match task.status {
                TaskStatus::Pending => tasks.pending += 1,
                TaskStatus::Running => tasks.running += 1,
                TaskStatus::Completed => tasks.completed += 1,
                TaskStatus::Failed => tasks.failed += 1,
                TaskStatus::Cancelled => tasks.cancelled += 1,
            }
        }
        let messages = self.messages.read().await;
        BlackboardStats {
            conversation_messages: self.conversation.read().await.len(),
            agent_messages: messages.len(),
            agent_messages_evicted: messages.evicted(),
            tasks,
            workers: self.workers.stats().await,
            patterns: self.patterns.read().await.len(),
        }
    }
}

/// Shared handle used by every component.
pub type SharedBlackboard = Arc<Blackboard>;
