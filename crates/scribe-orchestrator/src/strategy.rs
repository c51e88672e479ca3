//! Execution strategy selection.
//!
//! Work items whose precondition does not hold are filtered out first. The
//! remaining set is run sequentially, in DAG batches, or through the
//! refinement cluster. An optional [`StrategyReasoner`] may pick the
//! strategy; when it fails, times out or answers with an unknown label the
//! choice is `sequential`. Without a reasoner a fixed policy decides.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scribe_abstraction::{CompletionRequest, InferenceService, ModelError, ModelTier};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::config::ExecutionConfig;
use crate::decode::{decode, Decode, FieldScan};
use crate::documents::DocumentSnapshot;
use crate::events::{TraceEvent, TraceReporter};
use crate::intent::Intent;

const REASONER_MAX_TOKENS: u32 = 300;
const REASONER_TEMPERATURE: f32 = 0.1;

const REASONER_SYSTEM: &str = "\
You decide how a writing assistant executes a set of work items.

Strategies:
- sequential: one item at a time. Safe default.
- parallel: three or more independent items where throughput matters.
- cluster: one or two high-priority items where quality matters most; each item is drafted, reviewed and revised.

Respond with ONLY valid JSON: {\"strategy\": \"sequential|parallel|cluster\", \"reasoning\": \"...\"}";

/// How a set of work items is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One item at a time.
    #[default]
    Sequential,
    /// Dependency-ordered batches, concurrent within a batch.
    Parallel,
    /// Producer/reviewer refinement per item.
    Cluster,
}

impl ExecutionStrategy {
    /// Label used in prompts, logs and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "cluster" => Ok(Self::Cluster),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// What the selector looks at.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInput<'a> {
    /// Resolved intent.
    pub intent: Intent,
    /// Its confidence.
    pub confidence: f32,
    /// Executable items, already filtered.
    pub actions: &'a [Action],
    /// Whether the refinement cluster may be used.
    pub enable_critic: bool,
}

/// A reasoner's raw answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StrategyAnswer {
    /// Strategy label as written by the reasoner.
    #[serde(default)]
    pub strategy: String,
    /// Why.
    #[serde(default)]
    pub reasoning: String,
}

impl Decode for StrategyAnswer {
    fn from_fields(fields: &FieldScan<'_>) -> Option<Self> {
        Some(Self { strategy: fields.string("strategy")?, reasoning: fields.string("reasoning").unwrap_or_default() })
    }

    fn fallback(_raw: &str) -> Self {
        Self::default()
    }
}

/// The selected strategy and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyDecision {
    /// Strategy.
    pub strategy: ExecutionStrategy,
    /// Chosen by the reasoner rather than the fixed policy or the fallback.
    pub from_reasoner: bool,
    /// Explanation.
    pub reasoning: String,
}

/// Pluggable strategy chooser.
#[async_trait]
pub trait StrategyReasoner: Send + Sync {
    /// Suggests a strategy for `input`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the suggestion cannot be obtained.
    async fn suggest(&self, input: &StrategyInput<'_>) -> Result<StrategyAnswer, ModelError>;
}

/// Reasoner backed by the fast tier.
#[derive(Clone)]
pub struct LlmStrategyReasoner {
    inference: Arc<dyn InferenceService>,
}

impl fmt::Debug for LlmStrategyReasoner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmStrategyReasoner").finish_non_exhaustive()
    }
}

impl LlmStrategyReasoner {
    /// Creates a reasoner.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>) -> Self {
        Self { inference }
    }

    fn user_prompt(input: &StrategyInput<'_>) -> String {
        let items: Vec<String> = input
            .actions
            .iter()
            .map(|a| {
                let deps = if a.depends_on.is_empty() { String::new() } else { format!(" after {}", a.depends_on.join(", ")) };
                format!("- {} {} ({:?} priority){deps}", a.id, a.kind.task_type(), a.priority)
            })
            .collect();
        format!(
            "Intent: {} (confidence {:.2})\nReview available: {}\nWork items:\n{}\n\nWhich strategy?",
            input.intent,
            input.confidence,
            input.enable_critic,
            items.join("\n")
        )
    }
}

#[async_trait]
impl StrategyReasoner for LlmStrategyReasoner {
    async fn suggest(&self, input: &StrategyInput<'_>) -> Result<StrategyAnswer, ModelError> {
        let request = CompletionRequest::new(ModelTier::Fast, REASONER_SYSTEM, Self::user_prompt(input))
            .with_max_tokens(REASONER_MAX_TOKENS)
            .with_temperature(REASONER_TEMPERATURE);
        let response = self.inference.complete(request).await?;
        let decoded = decode::<StrategyAnswer>(&response.content);
        debug!(stage = %decoded.stage, label = %decoded.value.strategy, "Strategy reasoner replied");
        Ok(decoded.value)
    }
}

/// Drops items whose precondition fails or whose dependency is not in the
/// set, plus everything depending on them.
///
/// Returns the runnable items in their original order and the dropped ids.
#[must_use]
pub fn filter_unready(actions: Vec<Action>, snapshot: &DocumentSnapshot) -> (Vec<Action>, Vec<String>) {
    let known: HashSet<&str> = actions.iter().map(|a| a.id.as_str()).collect();
    let mut dropped: HashSet<String> = actions
        .iter()
        .filter(|a| {
            a.precondition.as_ref().is_some_and(|p| !p.is_satisfied(snapshot))
                || a.depends_on.iter().any(|d| !known.contains(d.as_str()))
        })
        .map(|a| a.id.clone())
        .collect();

    loop {
        let before = dropped.len();
        for action in &actions {
            if action.depends_on.iter().any(|d| dropped.contains(d)) {
                dropped.insert(action.id.clone());
            }
        }
        if dropped.len() == before {
            break;
        }
    }

    let mut dropped_ids = Vec::new();
    let mut runnable = Vec::with_capacity(actions.len());
    for action in actions {
        if dropped.contains(&action.id) {
            dropped_ids.push(action.id);
        } else {
            runnable.push(action);
        }
    }
    (runnable, dropped_ids)
}

/// Chooses an execution strategy.
#[derive(Clone)]
pub struct StrategySelector {
    reasoner: Option<Arc<dyn StrategyReasoner>>,
    parallel_min_items: usize,
    timeout: Duration,
    reporter: Option<Arc<TraceReporter>>,
}

impl fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySelector")
            .field("has_reasoner", &self.reasoner.is_some())
            .field("parallel_min_items", &self.parallel_min_items)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StrategySelector {
    /// Creates a selector that uses the fixed policy only.
    #[must_use]
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            reasoner: None,
            parallel_min_items: config.parallel_min_items.max(1),
            timeout: Duration::from_secs(config.strategy_timeout_secs),
            reporter: None,
        }
    }

    /// Consults `reasoner` before falling back.
    #[must_use]
    pub fn with_reasoner(mut self, reasoner: Arc<dyn StrategyReasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Overrides the reasoner budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publishes the decision.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<TraceReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The fixed policy.
    #[must_use]
    pub fn policy(&self, input: &StrategyInput<'_>) -> ExecutionStrategy {
        match input.intent {
            Intent::AnswerQuestion | Intent::GeneralChat | Intent::NavigateSection | Intent::CreateStructure => {
                ExecutionStrategy::Sequential
            }
            _ if input.actions.len() >= self.parallel_min_items => ExecutionStrategy::Parallel,
            Intent::WriteContent | Intent::ImproveContent | Intent::RewriteWithCoherence
                if input.enable_critic && input.confidence > 0.9 && input.actions.iter().any(|a| a.kind.is_writing()) =>
            {
                ExecutionStrategy::Cluster
            }
            _ => ExecutionStrategy::Sequential,
        }
    }

    /// Picks a strategy for `input`.
    pub async fn select(&self, input: &StrategyInput<'_>) -> StrategyDecision {
        let decision = match &self.reasoner {
            None => StrategyDecision {
                strategy: self.policy(input),
                from_reasoner: false,
                reasoning: "fixed policy".to_string(),
            },
            Some(reasoner) => self.ask(reasoner.as_ref(), input).await,
        };

        info!(
            strategy = %decision.strategy,
            from_reasoner = decision.from_reasoner,
            items = input.actions.len(),
            "Strategy selected"
        );
        if let Some(reporter) = &self.reporter {
            reporter.emit(TraceEvent::StrategySelected {
                strategy: decision.strategy,
                from_reasoner: decision.from_reasoner,
                items: input.actions.len(),
            });
        }
        decision
    }

    async fn ask(&self, reasoner: &dyn StrategyReasoner, input: &StrategyInput<'_>) -> StrategyDecision {
        let fallback = |reason: String| StrategyDecision {
            strategy: ExecutionStrategy::Sequential,
            from_reasoner: false,
            reasoning: reason,
        };

        let answer = match tokio::time::timeout(self.timeout, reasoner.suggest(input)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(err)) => {
                warn!(error = %err, "Strategy reasoner failed, running sequentially");
                return fallback(format!("reasoner failed: {err}"));
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Strategy reasoner timed out, running sequentially");
                return fallback("reasoner timed out".to_string());
            }
        };

        match answer.strategy.parse::<ExecutionStrategy>() {
            Ok(ExecutionStrategy::Cluster) if !input.enable_critic => {
                warn!("Reasoner chose cluster with review disabled, running sequentially");
                fallback("cluster requested with review disabled".to_string())
            }
            Ok(strategy) => StrategyDecision { strategy, from_reasoner: true, reasoning: answer.reasoning },
            Err(err) => {
                warn!(label = %answer.strategy, "Unrecognised strategy label, running sequentially");
                fallback(err)
            }
        }
    }
}
