//! Dependency graph over work items and batched execution.
//!
//! Work items become nodes of a [`petgraph`] graph with an edge from each
//! dependency to its dependent. [`TaskDag::batches`] layers the graph: a
//! batch holds every unscheduled node whose dependencies all sit in earlier
//! batches. [`DagExecutor`] runs batches strictly in order and the items of
//! one batch concurrently.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::blackboard::Task;
use crate::error::DagError;
use crate::events::{TraceEvent, TraceReporter};

/// One node with its neighbourhood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagNode {
    /// Work item id.
    pub id: String,
    /// Ids this node waits for.
    pub dependencies: Vec<String>,
    /// Ids waiting for this node.
    pub dependents: Vec<String>,
}

/// Dependency graph for one execution request.
#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskDag {
    /// Builds the graph from `(id, dependencies)` pairs.
    ///
    /// # Errors
    /// Returns `DagError::DuplicateNode` for a repeated id and
    /// `DagError::DependencyNotFound` for a dependency outside the set.
    pub fn build<I, S>(items: I) -> Result<Self, DagError>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut dag = Self::default();
        let mut pending = Vec::new();

        // First pass: nodes
        for (id, dependencies) in items {
            let id = id.into();
            if dag.index.contains_key(&id) {
                return Err(DagError::DuplicateNode(id));
            }
            let node = dag.graph.add_node(id.clone());
            dag.index.insert(id, node);
            pending.push((node, dependencies));
        }

        // Second pass: edges from dependency to dependent
        for (node, dependencies) in pending {
            for dependency in dependencies {
                let Some(&from) = dag.index.get(&dependency) else {
                    return Err(DagError::DependencyNotFound { node: dag.graph[node].clone(), dependency });
                };
                dag.graph.add_edge(from, node, ());
            }
        }

        debug!(nodes = dag.graph.node_count(), edges = dag.graph.edge_count(), "Dependency graph built");
        Ok(dag)
    }

    /// Builds the graph from blackboard tasks.
    ///
    /// # Errors
    /// See [`TaskDag::build`].
    pub fn from_tasks(tasks: &[Task]) -> Result<Self, DagError> {
        Self::build(tasks.iter().map(|t| (t.id.clone(), t.dependencies.clone())))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn ids(&self, node: NodeIndex, direction: Direction) -> Vec<String> {
        let mut neighbours: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        neighbours.sort_unstable();
        neighbours.dedup();
        neighbours.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// The node `id` with its dependencies and dependents.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<DagNode> {
        let &index = self.index.get(id)?;
        Some(DagNode {
            id: id.to_string(),
            dependencies: self.ids(index, Direction::Incoming),
            dependents: self.ids(index, Direction::Outgoing),
        })
    }

    /// Execution order as batches. Ids inside a batch keep insertion order.
    ///
    /// # Errors
    /// Returns `DagError::CycleDetected` naming every node that can never
    /// become ready. No batches are produced in that case.
    pub fn batches(&self) -> Result<Vec<Vec<String>>, DagError> {
        let mut scheduled: HashSet<NodeIndex> = HashSet::with_capacity(self.len());
        let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<NodeIndex>, Vec<NodeIndex>) = remaining
                .into_iter()
                .partition(|&n| self.graph.neighbors_directed(n, Direction::Incoming).all(|d| scheduled.contains(&d)));

            if ready.is_empty() {
                let mut stuck: Vec<String> = blocked.iter().map(|&n| self.graph[n].clone()).collect();
                stuck.sort();
                error!(stuck = ?stuck, "Dependency cycle, no batch can be scheduled");
                return Err(DagError::CycleDetected { stuck });
            }

            scheduled.extend(ready.iter().copied());
            batches.push(ready.into_iter().map(|n| self.graph[n].clone()).collect());
            remaining = blocked;
        }

        debug!(batches = batches.len(), "Execution batches computed");
        Ok(batches)
    }
}

/// What happened to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome<T> {
    /// The node ran and succeeded.
    Succeeded(T),
    /// The node ran and failed.
    Failed(String),
    /// The node did not run because a dependency failed.
    Skipped {
        /// The failed dependency.
        failed_dependency: String,
    },
}

impl<T> NodeOutcome<T> {
    /// Returns true for [`NodeOutcome::Succeeded`].
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Result of running a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DagRun<T> {
    /// Batches as executed.
    pub batches: Vec<Vec<String>>,
    /// Outcome per node, in batch order.
    pub outcomes: Vec<(String, NodeOutcome<T>)>,
}

impl<T> DagRun<T> {
    /// Outcome of node `id`.
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome<T>> {
        self.outcomes.iter().find(|(node, _)| node == id).map(|(_, outcome)| outcome)
    }

    /// Number of nodes that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    /// Ids of nodes that failed or were skipped.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.outcomes.iter().filter(|(_, o)| !o.is_success()).map(|(id, _)| id.as_str()).collect()
    }
}

/// Runs a [`TaskDag`] batch by batch.
#[derive(Debug, Clone)]
pub struct DagExecutor {
    max_concurrency: usize,
    reporter: Option<Arc<TraceReporter>>,
}

impl DagExecutor {
    /// Creates an executor running at most `max_concurrency` items at once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency: max_concurrency.max(1), reporter: None }
    }

    /// Publishes batch events on `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<TraceReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(reporter) = &self.reporter {
            reporter.emit(event);
        }
    }

    /// Runs every node of `dag` through `run`.
    ///
    /// A failing node does not stop its siblings. Nodes that depend on a
    /// failed or skipped node are skipped.
    ///
    /// # Errors
    /// Returns `DagError::CycleDetected` before anything runs if the graph
    /// cannot be batched.
    pub async fn execute<T, E, F, Fut>(&self, dag: &TaskDag, run: F) -> Result<DagRun<T>, DagError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let batches = dag.batches()?;
        let semaphore = Semaphore::new(self.max_concurrency);
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(dag.len());

        for (index, batch) in batches.iter().enumerate() {
            info!(batch = index, size = batch.len(), "Batch started");
            self.emit(TraceEvent::BatchStarted { index, task_ids: batch.clone() });

            let mut runnable = Vec::with_capacity(batch.len());
            let mut batch_outcomes = Vec::with_capacity(batch.len());
            for id in batch {
                let blocked_by = dag
                    .node(id)
                    .and_then(|node| node.dependencies.into_iter().find(|d| unavailable.contains(d)));
                match blocked_by {
                    Some(failed_dependency) => {
                        warn!(task_id = %id, dependency = %failed_dependency, "Skipping item after failed dependency");
                        batch_outcomes.push((id.clone(), NodeOutcome::Skipped { failed_dependency }));
                    }
                    None => runnable.push(id.clone()),
                }
            }

            let semaphore = &semaphore;
            let run = &run;
            let results = join_all(runnable.into_iter().map(|id| async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire().await.ok();
                let result = run(id.clone()).await;
                (id, result)
            }))
            .await;

            for (id, result) in results {
                match result {
                    Ok(value) => batch_outcomes.push((id, NodeOutcome::Succeeded(value))),
                    Err(err) => {
                        warn!(task_id = %id, error = %err, "Item failed");
                        batch_outcomes.push((id, NodeOutcome::Failed(err.to_string())));
                    }
                }
            }

            let failed = batch_outcomes.iter().filter(|(_, o)| !o.is_success()).count();
            unavailable.extend(batch_outcomes.iter().filter(|(_, o)| !o.is_success()).map(|(id, _)| id.clone()));
            info!(batch = index, succeeded = batch_outcomes.len() - failed, failed, "Batch finished");
            self.emit(TraceEvent::BatchFinished { index, succeeded: batch_outcomes.len() - failed, failed });
            outcomes.extend(batch_outcomes);
        }

        Ok(DagRun { batches, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn deps(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_independent_items_form_one_batch() {
        let dag = TaskDag::build([("a", deps(&[])), ("b", deps(&[])), ("c", deps(&[]))]).unwrap();
        assert_eq!(dag.batches().unwrap(), vec![deps(&["a", "b", "c"])]);
    }

    #[test]
    fn test_diamond_layers_and_dependencies_precede() {
        let dag = TaskDag::build([
            ("top", deps(&[])),
            ("left", deps(&["top"])),
            ("right", deps(&["top"])),
            ("bottom", deps(&["left", "right"])),
        ])
        .unwrap();
        let batches = dag.batches().unwrap();
        assert_eq!(batches, vec![deps(&["top"]), deps(&["left", "right"]), deps(&["bottom"])]);

        // Every item appears once and after all of its dependencies.
        let position: HashMap<&str, usize> =
            batches.iter().enumerate().flat_map(|(i, b)| b.iter().map(move |id| (id.as_str(), i))).collect();
        assert_eq!(position.len(), 4);
        for id in ["top", "left", "right", "bottom"] {
            for dependency in dag.node(id).unwrap().dependencies {
                assert!(position[dependency.as_str()] < position[id]);
            }
        }
        assert_eq!(dag.node("top").unwrap().dependents, deps(&["left", "right"]));
    }

    #[test]
    fn test_cycle_names_stuck_nodes_and_yields_no_batches() {
        let dag = TaskDag::build([("A", deps(&["B"])), ("B", deps(&["A"])), ("C", deps(&[]))]).unwrap();
        let err = dag.batches().unwrap_err();
        assert_eq!(err, DagError::CycleDetected { stuck: deps(&["A", "B"]) });
        assert!(err.to_string().contains("A, B"));
    }

    #[test]
    fn test_unknown_dependency_and_duplicate_id() {
        let err = TaskDag::build([("a", deps(&["ghost"]))]).unwrap_err();
        assert_eq!(err, DagError::DependencyNotFound { node: "a".to_string(), dependency: "ghost".to_string() });

        let err = TaskDag::build([("a", deps(&[])), ("a", deps(&[]))]).unwrap_err();
        assert_eq!(err, DagError::DuplicateNode("a".to_string()));
    }

    #[tokio::test]
    async fn test_batch_runs_concurrently_and_failures_are_collected() {
        let dag = TaskDag::build([("a", deps(&[])), ("b", deps(&[])), ("c", deps(&[])), ("d", deps(&["b"]))]).unwrap();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let run = dag_run(&dag, &in_flight, &peak).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(run.outcome("a"), Some(&NodeOutcome::Succeeded("a".to_string())));
        assert_eq!(run.outcome("b"), Some(&NodeOutcome::Failed("b broke".to_string())));
        assert_eq!(run.outcome("c"), Some(&NodeOutcome::Succeeded("c".to_string())));
        assert_eq!(run.outcome("d"), Some(&NodeOutcome::Skipped { failed_dependency: "b".to_string() }));
        assert_eq!(run.succeeded(), 2);
    }

    async fn dag_run(dag: &TaskDag, in_flight: &AtomicUsize, peak: &AtomicUsize) -> DagRun<String> {
        let reporter = Arc::new(TraceReporter::default());
        let mut events = reporter.subscribe();
        let executor = DagExecutor::new(4).with_reporter(reporter);

        let run = executor
            .execute(dag, |id| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if id == "b" { Err(format!("{id} broke")) } else { Ok(id) }
            })
            .await
            .unwrap();

        assert!(matches!(events.try_recv().unwrap(), TraceEvent::BatchStarted { index: 0, .. }));
        assert!(matches!(events.try_recv().unwrap(), TraceEvent::BatchFinished { index: 0, succeeded: 2, failed: 1 }));
        run
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let dag = TaskDag::build((0..6).map(|n| (format!("t{n}"), Vec::new()))).unwrap();
        let (in_flight, peak) = (&AtomicUsize::new(0), &AtomicUsize::new(0));

        let run = DagExecutor::new(2)
            .execute(&dag, |_| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap();

        assert_eq!(run.succeeded(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_running_anything() {
        let dag = TaskDag::build([("A", deps(&["B"])), ("B", deps(&["A"]))]).unwrap();
        let calls = &AtomicUsize::new(0);
        let result = DagExecutor::new(2)
            .execute(&dag, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
