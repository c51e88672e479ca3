//! Worker registry and allocation.
//!
//! Candidates are scored as
//! `0.4 * load + 0.3 * performance + 0.3 * specialization` where
//! `load = 1 / (tasks_assigned + 1)`,
//! `performance = 1 / (avg_execution_secs + 1)` (0.5 without history) and
//! `specialization = 1.0` for single-capability workers, else 0.5.
//! Ties go to the earliest registered worker.
//!
//! Allocation and release both run under the pool's write lock, so two
//! concurrent allocations can never hand the same worker out twice.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use super::{Worker, WorkerStatus};
use crate::error::BlackboardError;

const LOAD_WEIGHT: f64 = 0.4;
const PERFORMANCE_WEIGHT: f64 = 0.3;
const SPECIALIZATION_WEIGHT: f64 = 0.3;
const DEFAULT_PERFORMANCE: f64 = 0.5;
const WAIT_POLL: Duration = Duration::from_millis(25);

/// One allocation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Task that was placed.
    pub task_id: String,
    /// Its type.
    pub task_type: String,
    /// Worker that received it.
    pub worker_id: String,
    /// Winning score.
    pub score: f64,
    /// When.
    pub allocated_at: DateTime<Utc>,
}

/// Outcome reported when a worker finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionRecord {
    /// Whether the task succeeded.
    pub success: bool,
    /// Wall time in seconds.
    pub execution_secs: f64,
    /// Cost attributed to the task.
    pub cost: f64,
    /// Tokens attributed to the task.
    pub tokens: u64,
}

/// Pool summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Registered workers.
    pub total: usize,
    /// Idle workers.
    pub idle: usize,
    /// Busy workers.
    pub busy: usize,
    /// Offline workers.
    pub offline: usize,
    /// Successful tasks across the pool.
    pub tasks_completed: u64,
    /// Failed tasks across the pool.
    pub tasks_failed: u64,
    /// Mean of per-worker average execution times, for workers with history.
    pub avg_execution_secs: Option<f64>,
    /// Accumulated cost across the pool.
    pub total_cost: f64,
}

#[derive(Debug, Default)]
struct Pool {
    workers: Vec<Worker>,
    index: HashMap<String, usize>,
    history: VecDeque<AllocationRecord>,
}

impl Pool {
    fn get_mut(&mut self, id: &str) -> Result<&mut Worker, BlackboardError> {
        let idx = *self.index.get(id).ok_or_else(|| BlackboardError::AgentNotFound(id.to_string()))?;
        Ok(&mut self.workers[idx])
    }
}

/// Registry for the worker pool.
pub struct WorkerRegistry {
    pool: Arc<RwLock<Pool>>,
    released: Arc<Notify>,
    history_capacity: usize,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("worker_count", &self.pool.try_read().map(|p| p.workers.len()).unwrap_or(0))
            .field("history_capacity", &self.history_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}

impl WorkerRegistry {
    /// Creates an empty registry keeping `history_capacity` allocation records.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            pool: Arc::new(RwLock::new(Pool::default())),
            released: Arc::new(Notify::new()),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Scores `worker` for `task_type`. Higher is better.
    #[must_use]
    pub fn score(worker: &Worker, task_type: &str) -> f64 {
        let load = 1.0 / (f64::from(worker.performance.tasks_assigned) + 1.0);
        let performance =
            worker.performance.avg_execution_secs.map_or(DEFAULT_PERFORMANCE, |avg| 1.0 / (avg + 1.0));
        let specialization =
            if worker.capabilities.len() == 1 && worker.can_handle(task_type) { 1.0 } else { 0.5 };

        LOAD_WEIGHT * load + PERFORMANCE_WEIGHT * performance + SPECIALIZATION_WEIGHT * specialization
    }

    /// Registers a worker. It always starts idle and empty-handed.
    ///
    /// # Errors
    /// Returns `DuplicateAgent` if the id is taken.
    pub async fn register(&self, mut worker: Worker) -> Result<(), BlackboardError> {
        let mut pool = self.pool.write().await;
        if pool.index.contains_key(&worker.id) {
            return Err(BlackboardError::DuplicateAgent(worker.id));
        }

        debug!(agent_id = %worker.id, role = ?worker.role, capabilities = ?worker.capabilities, "Registering worker");
        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        let idx = pool.workers.len();
        pool.index.insert(worker.id.clone(), idx);
        pool.workers.push(worker);
        Ok(())
    }

    /// Removes an idle or offline worker.
    ///
    /// # Errors
    /// Returns `AgentBusy` while the worker holds a task.
    pub async fn deregister(&self, id: &str) -> Result<Worker, BlackboardError> {
        let mut pool = self.pool.write().await;
        if pool.get_mut(id)?.status == WorkerStatus::Busy {
            return Err(BlackboardError::AgentBusy(id.to_string()));
        }

        let idx = pool.index.remove(id).ok_or_else(|| BlackboardError::AgentNotFound(id.to_string()))?;
        let removed = pool.workers.remove(idx);
        let reindexed: Vec<(String, usize)> =
            pool.workers.iter().enumerate().map(|(i, w)| (w.id.clone(), i)).collect();
        pool.index = reindexed.into_iter().collect();
        Ok(removed)
    }

    /// Returns a snapshot of one worker.
    pub async fn get(&self, id: &str) -> Option<Worker> {
        let pool = self.pool.read().await;
        pool.index.get(id).map(|&idx| pool.workers[idx].clone())
    }

    /// Returns every worker in registration order.
    pub async fn all(&self) -> Vec<Worker> {
        self.pool.read().await.workers.clone()
    }

    /// Moves a worker between idle and offline.
    ///
    /// # Errors
    /// `InvalidAgentStatus` when asked for busy, `AgentBusy` when the worker
    /// currently holds a task.
    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> Result<Worker, BlackboardError> {
        if status == WorkerStatus::Busy {
            return Err(BlackboardError::InvalidAgentStatus(id.to_string()));
        }

        let mut pool = self.pool.write().await;
        let worker = pool.get_mut(id)?;
        if worker.status == WorkerStatus::Busy {
            return Err(BlackboardError::AgentBusy(id.to_string()));
        }
        worker.status = status;
        let snapshot = worker.clone();
        drop(pool);

        if status == WorkerStatus::Idle {
            self.released.notify_waiters();
        }
        Ok(snapshot)
    }

    /// Idle workers that accept `task_type`, in registration order.
    pub async fn find_capable(&self, task_type: &str) -> Vec<Worker> {
        self.pool.read().await.workers.iter().filter(|w| w.is_available_for(task_type)).cloned().collect()
    }

    /// Best idle worker for `task_type` with its score.
    pub async fn find_best(&self, task_type: &str) -> Option<(Worker, f64)> {
        let pool = self.pool.read().await;
        best_candidate(&pool.workers, task_type).map(|(idx, score)| (pool.workers[idx].clone(), score))
    }

    /// Places `task_id` on the best idle worker.
    ///
    /// Returns `None` when no idle worker accepts the type; callers treat
    /// that as "try again later", not as an error.
    pub async fn allocate(&self, task_id: &str, task_type: &str) -> Option<AllocationRecord> {
        let mut pool = self.pool.write().await;
        let Some((idx, score)) = best_candidate(&pool.workers, task_type) else {
            debug!(task_id = %task_id, task_type = %task_type, "No idle worker available");
            return None;
        };

        let worker = &mut pool.workers[idx];
        worker.status = WorkerStatus::Busy;
        worker.current_task = Some(task_id.to_string());
        worker.performance.tasks_assigned += 1;

        let record = AllocationRecord {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            worker_id: worker.id.clone(),
            score,
            allocated_at: Utc::now(),
        };
        debug!(task_id = %task_id, agent_id = %record.worker_id, score, "Allocated worker");

        if pool.history.len() >= self.history_capacity {
            pool.history.pop_front();
        }
        pool.history.push_back(record.clone());
        Some(record)
    }

    /// Like [`allocate`](Self::allocate) but waits up to `wait` for a capable
    /// worker to become idle. Gives up immediately when no online worker
    /// accepts the type at all.
    pub async fn allocate_or_wait(&self, task_id: &str, task_type: &str, wait: Duration) -> Option<AllocationRecord> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(record) = self.allocate(task_id, task_type).await {
                return Some(record);
            }
            if !self.has_online_capable(task_type).await {
                warn!(task_type = %task_type, "No online worker accepts this task type");
                return None;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(task_id = %task_id, task_type = %task_type, "Timed out waiting for an idle worker");
                return None;
            }
            let slice = WAIT_POLL.min(deadline - now);
            let _ = tokio::time::timeout(slice, self.released.notified()).await;
        }
    }

    async fn has_online_capable(&self, task_type: &str) -> bool {
        self.pool.read().await.workers.iter().any(|w| w.status != WorkerStatus::Offline && w.can_handle(task_type))
    }

    /// Records a finished task and returns the worker to idle.
    ///
    /// # Errors
    /// `AgentNotFound`, or `TaskNotHeld` if the worker is not holding `task_id`.
    pub async fn complete(
        &self,
        worker_id: &str,
        task_id: &str,
        record: CompletionRecord,
    ) -> Result<Worker, BlackboardError> {
        let mut pool = self.pool.write().await;
        let worker = pool.get_mut(worker_id)?;
        if worker.current_task.as_deref() != Some(task_id) {
            return Err(BlackboardError::TaskNotHeld { agent_id: worker_id.to_string(), task_id: task_id.to_string() });
        }

        worker.performance.record(record.success, record.execution_secs, record.cost, record.tokens);
        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        let snapshot = worker.clone();
        drop(pool);

        self.released.notify_waiters();
        Ok(snapshot)
    }

    /// Returns a worker to idle without touching its history (cancellation).
    ///
    /// # Errors
    /// `AgentNotFound`, or `TaskNotHeld` if the worker is not holding `task_id`.
    pub async fn release(&self, worker_id: &str, task_id: &str) -> Result<Worker, BlackboardError> {
        let mut pool = self.pool.write().await;
        let worker = pool.get_mut(worker_id)?;
        if worker.current_task.as_deref() != Some(task_id) {
            return Err(BlackboardError::TaskNotHeld { agent_id: worker_id.to_string(), task_id: task_id.to_string() });
        }
        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        let snapshot = worker.clone();
        drop(pool);

        self.released.notify_waiters();
        Ok(snapshot)
    }

    /// Recent allocation decisions, oldest first.
    pub async fn allocation_history(&self) -> Vec<AllocationRecord> {
        self.pool.read().await.history.iter().cloned().collect()
    }

    /// Pool summary.
    pub async fn stats(&self) -> RegistryStats {
        let pool = self.pool.read().await;
        let mut stats = RegistryStats { total: pool.workers.len(), ..RegistryStats::default() };
        let mut averages = Vec::new();

        for worker in &pool.workers {
            match worker.status {
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Offline => stats.offline += 1,
            }
            stats.tasks_completed += u64::from(worker.performance.tasks_completed);
            stats.tasks_failed += u64::from(worker.performance.tasks_failed);
            stats.total_cost += worker.performance.total_cost;
            if let Some(avg) = worker.performance.avg_execution_secs {
                averages.push(avg);
            }
        }
        if !averages.is_empty() {
            stats.avg_execution_secs = Some(averages.iter().sum::<f64>() / averages.len() as f64);
        }
        stats
    }
}

/// Index and score of the best idle candidate; earliest registration wins ties.
fn best_candidate(workers: &[Worker], task_type: &str) -> Option<(usize, f64)> {
    workers
        .iter()
        .enumerate()
        .filter(|(_, w)| w.is_available_for(task_type))
        .map(|(idx, w)| (idx, WorkerRegistry::score(w, task_type)))
        .fold(None, |best: Option<(usize, f64)>, (idx, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
}
