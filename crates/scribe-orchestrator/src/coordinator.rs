// Strategy coordinator
//
// Drives one request end to end: intent pipeline, action planning,
// precondition filtering, strategy selection, task queueing, execution
// through the DAG executor and refinement cluster, and write-back of every
// result to the blackboard.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scribe_abstraction::InferenceService;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{Action, ActionKind, ActionPlanner, ContentPurpose};
use crate::blackboard::{
    A2AMessage, A2AMessageType, Blackboard, BlackboardStats, ConversationMessage, CoordinatorToken, MessageKind,
    MessageMetadata, MessageRole, SharedBlackboard, Task, TaskConstraints, TaskOutcome, TaskOutput, TaskReport,
    TaskStatus, COORDINATOR_ID,
};
use crate::cluster::{DraftRequest, LlmCritic, LlmWriter, Producer, RefinementCluster, RefinementSettings, Reviewer};
use crate::config::OrchestratorConfig;
use crate::dag::{DagExecutor, DagRun, NodeOutcome, TaskDag};
use crate::documents::{DocumentSnapshot, DocumentStateProvider, InMemoryDocuments};
use crate::error::{OrchestrationError, Result};
use crate::events::{TraceEvent, TraceReporter};
use crate::intent::{
    ActiveSegment, CanvasContext, HistoryTurn, Intent, IntentAnalysis, IntentPipeline, PipelineContext, StructureItem,
};
use crate::strategy::{
    filter_unready, ExecutionStrategy, LlmStrategyReasoner, StrategyInput, StrategyReasoner, StrategySelector,
};
use crate::tools::{tool_call_for, RecordingToolExecutor, ToolContext, ToolExecutor};
use crate::workers::{default_pool, AllocationRecord};

/// Namespace for patterns learned from resolved intents.
pub const INTENT_NAMESPACE: &str = "intent";

/// Minimum confidence for a resolved intent to be remembered.
pub const PATTERN_LEARNING_CONFIDENCE: f32 = 0.9;

const TRACE_CAPACITY: usize = 1024;

const fn default_true() -> bool {
    true
}

const fn default_max_iterations() -> u32 {
    3
}

/// One user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrateRequest {
    /// The user's message.
    pub message: String,
    /// Conversation session.
    #[serde(default)]
    pub session_id: String,
    /// End user.
    #[serde(default)]
    pub user_id: String,
    /// Selected section.
    #[serde(default)]
    pub active_segment: Option<ActiveSegment>,
    /// A document is open.
    #[serde(default)]
    pub document_panel_open: bool,
    /// Format of the open document.
    #[serde(default)]
    pub document_format: Option<String>,
    /// Canvas summary.
    #[serde(default)]
    pub canvas: Option<CanvasContext>,
    /// Earlier turns; read from the blackboard when empty.
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
    /// Outline of the open document.
    #[serde(default)]
    pub structure_items: Vec<StructureItem>,
    /// Allow the producer/reviewer loop.
    #[serde(default = "default_true")]
    pub enable_critic: bool,
    /// Revision cap for reviewed items.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Reviewed items start from N competing drafts.
    #[serde(default)]
    pub competitive: bool,
    /// Forwarded to the tool executor.
    #[serde(default, skip_serializing)]
    pub credentials: BTreeMap<String, String>,
}

impl OrchestrateRequest {
    /// Creates a request with default settings and no UI context.
    #[must_use]
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            user_id: String::new(),
            active_segment: None,
            document_panel_open: false,
            document_format: None,
            canvas: None,
            conversation_history: Vec::new(),
            structure_items: Vec::new(),
            enable_critic: true,
            max_iterations: default_max_iterations(),
            competitive: false,
            credentials: BTreeMap::new(),
        }
    }

    /// Marks a document of `format` as open.
    #[must_use]
    pub fn with_panel_open(mut self, format: impl Into<String>) -> Self {
        self.document_panel_open = true;
        self.document_format = Some(format.into());
        self
    }

    /// Sets the selected section.
    #[must_use]
    pub fn with_active_segment(mut self, segment: ActiveSegment) -> Self {
        self.active_segment = Some(segment);
        self
    }

    /// Sets the canvas summary.
    #[must_use]
    pub fn with_canvas(mut self, canvas: CanvasContext) -> Self {
        self.canvas = Some(canvas);
        self
    }

    fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            message: self.message.clone(),
            active_segment: self.active_segment.clone(),
            document_panel_open: self.document_panel_open,
            document_format: self.document_format.clone(),
            canvas: self.canvas.clone(),
            conversation_history: self.conversation_history.clone(),
            structure_items: self.structure_items.clone(),
        }
    }
}

/// A message returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Author.
    pub role: MessageRole,
    /// Text.
    pub content: String,
    /// Kind of message.
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl ResponseMessage {
    fn orchestrator(kind: MessageKind, content: impl Into<String>) -> Self {
        Self { role: MessageRole::Orchestrator, content: content.into(), kind }
    }
}

/// Text produced for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    /// The text.
    pub content: String,
    /// Words in it.
    pub word_count: usize,
    /// Reviewer score when reviewed.
    pub score: Option<f32>,
    /// Reviewer approval when reviewed.
    pub approved: Option<bool>,
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrateResponse {
    /// Every executed item completed.
    pub success: bool,
    /// Session the response belongs to.
    pub session_id: String,
    /// Resolved intent.
    pub intent: Option<Intent>,
    /// Its confidence.
    pub confidence: f32,
    /// Why.
    pub reasoning: String,
    /// Strategy used, when anything ran.
    pub strategy: Option<ExecutionStrategy>,
    /// Every planned action, including those waiting for the user.
    pub actions: Vec<Action>,
    /// Messages for the user.
    pub messages: Vec<ResponseMessage>,
    /// Section id (or task id for unplaced text) to generated text.
    pub results: BTreeMap<String, SectionResult>,
    /// Most producer calls any item needed.
    pub iterations_used: u32,
    /// All reviewed items were approved; `None` when nothing was reviewed.
    pub critic_approved: Option<bool>,
    /// An action needs the user's answer or confirmation.
    pub requires_user_input: bool,
    /// Failure text.
    pub error: Option<String>,
    /// Pattern recorded for this request, for later feedback.
    pub pattern_id: Option<String>,
    /// Trace of the run.
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
}

impl OrchestrateResponse {
    fn for_analysis(session_id: &str, analysis: &IntentAnalysis) -> Self {
        Self {
            success: true,
            session_id: session_id.to_string(),
            intent: Some(analysis.intent),
            confidence: analysis.confidence,
            reasoning: analysis.reasoning.clone(),
            strategy: None,
            actions: Vec::new(),
            messages: Vec::new(),
            results: BTreeMap::new(),
            iterations_used: 0,
            critic_approved: None,
            requires_user_input: false,
            error: None,
            pattern_id: None,
            trace: Vec::new(),
        }
    }

    fn failure(session_id: &str, err: &OrchestrationError) -> Self {
        Self {
            success: false,
            session_id: session_id.to_string(),
            intent: None,
            confidence: 0.0,
            reasoning: String::new(),
            strategy: None,
            actions: Vec::new(),
            messages: vec![
                ResponseMessage::orchestrator(MessageKind::Error, err.to_string()),
                ResponseMessage::orchestrator(MessageKind::Thinking, err.suggestion()),
            ],
            results: BTreeMap::new(),
            iterations_used: 0,
            critic_approved: None,
            requires_user_input: false,
            error: Some(err.to_string()),
            pattern_id: None,
            trace: Vec::new(),
        }
    }
}

/// Builds an [`Orchestrator`].
pub struct OrchestratorBuilder {
    inference: Arc<dyn InferenceService>,
    config: OrchestratorConfig,
    documents: Option<Arc<dyn DocumentStateProvider>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    reasoner: Option<Arc<dyn StrategyReasoner>>,
    producer: Option<Arc<dyn Producer>>,
    reviewer: Option<Arc<dyn Reviewer>>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Starts a builder over `inference` with default configuration.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>) -> Self {
        Self {
            inference,
            config: OrchestratorConfig::default(),
            documents: None,
            tools: None,
            reasoner: None,
            producer: None,
            reviewer: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the document state provider. Defaults to an empty in-memory store.
    #[must_use]
    pub fn documents(mut self, documents: Arc<dyn DocumentStateProvider>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Sets the tool executor. Defaults to a recording executor.
    #[must_use]
    pub fn tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Sets the strategy reasoner. Without one, the LLM reasoner is used only
    /// when `execution.use_reasoner` is set.
    #[must_use]
    pub fn reasoner(mut self, reasoner: Arc<dyn StrategyReasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Replaces the LLM writer.
    #[must_use]
    pub fn producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Replaces the LLM critic.
    #[must_use]
    pub fn reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Validates the configuration, creates the blackboard and registers the
    /// default worker pool.
    ///
    /// # Errors
    /// `Config` for an invalid configuration, `Blackboard` if the pool cannot
    /// be registered.
    pub async fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let (board, token) = Blackboard::with_coordinator(config.blackboard.clone());
        let writers = config.execution.max_concurrency.max(config.execution.parallel_min_items);
        for worker in default_pool(writers) {
            board.register_agent(worker).await?;
        }

        let producer = self.producer.unwrap_or_else(|| {
            Arc::new(LlmWriter::new(Arc::clone(&self.inference), config.refinement.max_context_chars))
        });
        let reviewer = self.reviewer.unwrap_or_else(|| {
            Arc::new(LlmCritic::new(Arc::clone(&self.inference), config.refinement.max_review_chars))
        });
        let cluster =
            RefinementCluster::new(Arc::clone(&producer), reviewer, RefinementSettings::from(&config.refinement));

        let reasoner = self.reasoner.or_else(|| {
            config
                .execution
                .use_reasoner
                .then(|| Arc::new(LlmStrategyReasoner::new(Arc::clone(&self.inference))) as Arc<dyn StrategyReasoner>)
        });
        let mut selector = StrategySelector::new(&config.execution);
        if let Some(reasoner) = reasoner {
            selector = selector.with_reasoner(reasoner);
        }

        info!(workers = writers, reasoner = config.execution.use_reasoner, "Orchestrator ready");
        Ok(Orchestrator {
            pipeline: IntentPipeline::new(self.inference, config.triage.clone()),
            blackboard: Arc::new(board),
            token,
            selector,
            producer,
            cluster,
            documents: self.documents.unwrap_or_else(|| Arc::new(InMemoryDocuments::new())),
            tools: self.tools.unwrap_or_else(|| Arc::new(RecordingToolExecutor::new())),
            config,
        })
    }
}

/// Per-run state shared by every work item.
struct Job<'a> {
    request: &'a OrchestrateRequest,
    cancel: &'a CancellationToken,
    trace: &'a Arc<TraceReporter>,
    cluster: &'a RefinementCluster,
    tool_ctx: &'a ToolContext,
    snapshot: &'a DocumentSnapshot,
}

/// The orchestration core's public surface.
pub struct Orchestrator {
    config: OrchestratorConfig,
    blackboard: SharedBlackboard,
    token: CoordinatorToken,
    pipeline: IntentPipeline,
    selector: StrategySelector,
    producer: Arc<dyn Producer>,
    cluster: RefinementCluster,
    documents: Arc<dyn DocumentStateProvider>,
    tools: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("blackboard", &self.blackboard)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder(inference: Arc<dyn InferenceService>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(inference)
    }

    /// The shared state store.
    #[must_use]
    pub const fn blackboard(&self) -> &SharedBlackboard {
        &self.blackboard
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs a request to completion.
    pub async fn orchestrate(&self, request: OrchestrateRequest) -> OrchestrateResponse {
        self.orchestrate_with_cancel(request, CancellationToken::new()).await
    }

    /// Runs a request until it completes or `cancel` fires.
    ///
    /// Never fails: errors become a response with `success == false`, the
    /// error text and a suggestion for the user. Cancelled items end in
    /// [`TaskStatus::Cancelled`] and are not retried.
    pub async fn orchestrate_with_cancel(&self, request: OrchestrateRequest, cancel: CancellationToken) -> OrchestrateResponse {
        let trace = Arc::new(TraceReporter::new(TRACE_CAPACITY));
        let mut trace_rx = trace.subscribe();
        let started = Instant::now();

        let result = self.run(&request, &cancel, &trace).await;
        let events = drain(&mut trace_rx);
        self.log_trace(&request.session_id, &events).await;

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(session_id = %request.session_id, error = %err, "Orchestration failed");
                self.blackboard.append_message(ConversationMessage::orchestrator(MessageKind::Error, err.to_string())).await;
                OrchestrateResponse::failure(&request.session_id, &err)
            }
        };
        info!(
            session_id = %request.session_id,
            success = response.success,
            duration_ms = started.elapsed().as_millis(),
            "Orchestration finished"
        );
        response.trace = events;
        response
    }

    async fn run(
        &self,
        request: &OrchestrateRequest,
        cancel: &CancellationToken,
        trace: &Arc<TraceReporter>,
    ) -> Result<OrchestrateResponse> {
        let snapshot = self.documents.snapshot().await;
        let mut ctx = request.pipeline_context();
        if ctx.conversation_history.is_empty() {
            ctx.conversation_history = self
                .blackboard
                .recent_messages(None)
                .await
                .into_iter()
                .map(|m| HistoryTurn { role: role_name(m.role).to_string(), content: m.content })
                .collect();
        }
        self.blackboard.append_message(ConversationMessage::user(request.message.clone())).await;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            outcome = self.pipeline.analyze(&ctx, &snapshot) => outcome,
        };
        let analysis = outcome.analysis().clone();
        trace.emit(TraceEvent::IntentResolved {
            intent: analysis.intent,
            confidence: analysis.confidence,
            escalated: outcome.triage.was_escalated,
            deep_analysis: outcome.deep_ran,
        });
        self.blackboard
            .append_message(
                ConversationMessage::orchestrator(
                    MessageKind::Decision,
                    format!("Understood the request as {} ({:.2})", analysis.intent, analysis.confidence),
                )
                .with_metadata(MessageMetadata {
                    intent: Some(analysis.intent),
                    confidence: Some(analysis.confidence),
                    ..MessageMetadata::default()
                }),
            )
            .await;

        let mut response = OrchestrateResponse::for_analysis(&request.session_id, &analysis);
        for warning in &outcome.report.warnings {
            trace.emit(TraceEvent::ValidationIssue { message: warning.clone(), blocking: false });
            response.messages.push(ResponseMessage::orchestrator(MessageKind::Warning, warning.clone()));
        }
        for problem in &outcome.report.errors {
            trace.emit(TraceEvent::ValidationIssue { message: problem.clone(), blocking: true });
        }

        let planned = ActionPlanner::plan(&analysis, &ctx, &snapshot);
        response.actions.clone_from(&planned);
        let (awaiting_user, executable): (Vec<Action>, Vec<Action>) =
            planned.into_iter().partition(|a| a.requires_user_input);
        for action in &awaiting_user {
            response.requires_user_input = true;
            response.messages.push(ResponseMessage::orchestrator(MessageKind::Decision, user_prompt_for(action)));
        }

        let (executable, dropped) = filter_unready(executable, &snapshot);
        if !dropped.is_empty() {
            warn!(session_id = %request.session_id, dropped = ?dropped, "Filtered work items with unmet preconditions");
            trace.emit(TraceEvent::ActionsFiltered {
                action_ids: dropped,
                reason: "precondition not satisfied".to_string(),
            });
        }
        if executable.is_empty() {
            debug!(session_id = %request.session_id, "Nothing to execute");
            return Ok(response);
        }

        let decision = self
            .selector
            .clone()
            .with_reporter(Arc::clone(trace))
            .select(&StrategyInput {
                intent: analysis.intent,
                confidence: analysis.confidence,
                actions: &executable,
                enable_critic: request.enable_critic && self.config.execution.enable_critic,
            })
            .await;
        response.strategy = Some(decision.strategy);

        let dag = TaskDag::build(executable.iter().map(|a| (a.id.clone(), a.depends_on.clone())))?;
        dag.batches()?;
        self.queue_tasks(request, &executable, decision.strategy, &snapshot).await?;

        let concurrency = match decision.strategy {
            ExecutionStrategy::Parallel => self.config.execution.max_concurrency,
            ExecutionStrategy::Sequential | ExecutionStrategy::Cluster => 1,
        };
        let cluster = self
            .cluster
            .with_settings(RefinementSettings { max_iterations: request.max_iterations, ..self.cluster.settings() })
            .with_reporter(Arc::clone(trace));
        let tool_ctx = ToolContext { user_id: request.user_id.clone(), credentials: request.credentials.clone() };
        let job = Job { request, cancel, trace, cluster: &cluster, tool_ctx: &tool_ctx, snapshot: &snapshot };

        let run = DagExecutor::new(concurrency)
            .with_reporter(Arc::clone(trace))
            .execute(&dag, |task_id| self.execute_task(task_id, &job))
            .await?;
        self.settle_skipped(&run, cancel).await;
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        self.collect(&mut response, &run).await;
        if response.success && analysis.confidence >= PATTERN_LEARNING_CONFIDENCE {
            response.pattern_id = self
                .blackboard
                .learn_pattern(INTENT_NAMESPACE, &request.message, analysis.intent.as_str(), f64::from(analysis.confidence))
                .await;
        }
        Ok(response)
    }

    async fn queue_tasks(
        &self,
        request: &OrchestrateRequest,
        actions: &[Action],
        strategy: ExecutionStrategy,
        snapshot: &DocumentSnapshot,
    ) -> Result<()> {
        for action in actions {
            let reviewed = strategy == ExecutionStrategy::Cluster && action.kind.is_writing();
            let existing = action.kind.section_id().and_then(|id| snapshot.section_content(id)).map(str::to_string);
            let task = Task::from_action(request.session_id.clone(), action)
                .with_context(existing)
                .with_constraints(TaskConstraints {
                    requires_review: reviewed,
                    max_iterations: reviewed.then_some(request.max_iterations),
                });
            self.blackboard.assign_task(&self.token, task).await?;
        }
        Ok(())
    }

    /// Allocates, runs and reports one work item.
    async fn execute_task(&self, task_id: String, job: &Job<'_>) -> std::result::Result<TaskOutput, String> {
        if job.cancel.is_cancelled() {
            self.cancel_task(&task_id, job.trace).await;
            return Err("cancelled".to_string());
        }
        let task = self.blackboard.task(&task_id).await.ok_or_else(|| format!("task {task_id} not queued"))?;

        let wait = Duration::from_millis(self.config.execution.allocation_wait_ms);
        let worker_id = match self.blackboard.allocate(&self.token, &task_id, wait).await {
            Ok(Some(AllocationRecord { worker_id, .. })) => worker_id,
            Ok(None) => {
                warn!(task_id = %task_id, task_type = task.task_type(), "No idle worker, coordinator runs the item");
                job.trace.emit(TraceEvent::AllocationMissed {
                    task_id: task_id.clone(),
                    task_type: task.task_type().to_string(),
                });
                COORDINATOR_ID.to_string()
            }
            Err(err) => return Err(err.to_string()),
        };
        self.start_allocated(&task_id, &worker_id).await?;
        job.trace.emit(TraceEvent::TaskStarted { task_id: task_id.clone(), worker_id });

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = job.cancel.cancelled() => None,
            result = self.perform(&task, job) => Some(result),
        };
        let elapsed = started.elapsed();

        let Some(result) = result else {
            self.cancel_task(&task_id, job.trace).await;
            return Err("cancelled".to_string());
        };
        let outcome = match &result {
            Ok(output) => TaskOutcome::Completed(output.clone()),
            Err(err) => TaskOutcome::Failed(err.to_string()),
        };
        let report = TaskReport { task_id: task_id.clone(), outcome, execution_secs: elapsed.as_secs_f64() };
        self.blackboard.report_result(&self.token, report).await.map_err(|e| e.to_string())?;

        match result {
            Ok(output) => {
                job.trace.emit(TraceEvent::TaskCompleted {
                    task_id,
                    tokens: output.tokens,
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
                Ok(output)
            }
            Err(err) => {
                job.trace.emit(TraceEvent::TaskFailed { task_id, error: err.to_string() });
                Err(err.to_string())
            }
        }
    }

    /// Marks the item running; hands the worker back if that fails.
    async fn start_allocated(&self, task_id: &str, worker_id: &str) -> std::result::Result<(), String> {
        let Err(err) = self.blackboard.start_task(&self.token, task_id).await else {
            return Ok(());
        };
        warn!(task_id = %task_id, worker_id = %worker_id, error = %err, "Could not start item, releasing worker");
        if worker_id != COORDINATOR_ID {
            if let Err(release_err) = self.blackboard.workers().release(worker_id, task_id).await {
                debug!(task_id = %task_id, error = %release_err, "Worker already released");
            }
        }
        Err(err.to_string())
    }

    async fn perform(&self, task: &Task, job: &Job<'_>) -> Result<TaskOutput> {
        let (document_id, section_name, prompt) = match &task.action {
            ActionKind::GenerateContent { document_id, section_name, prompt, .. }
            | ActionKind::ImproveContent { document_id, section_name, prompt, .. } => (document_id, section_name, prompt),
            other => {
                let Some((tool, payload)) = tool_call_for(other, None) else {
                    return Ok(TaskOutput::default());
                };
                let metadata = self.tools.execute(tool, payload, job.tool_ctx).await?.into_result(tool)?;
                return Ok(TaskOutput { metadata, ..TaskOutput::default() });
            }
        };

        let context = document_id
            .as_deref()
            .and_then(|id| job.snapshot.document(id))
            .map(|doc| format!("Document: {} ({})", doc.name, doc.format));
        let draft = DraftRequest::new(task.id.clone(), prompt.clone())
            .with_section(section_name.clone())
            .with_existing(task.context.clone())
            .with_context(context);

        let mut output = if task.constraints.requires_review {
            let outcome = if job.request.competitive {
                job.cluster.best_of_n(&draft).await?
            } else {
                job.cluster.refine(&draft).await?
            };
            TaskOutput {
                score: Some(outcome.score),
                approved: Some(outcome.approved),
                iterations: outcome.producer_calls,
                tokens: outcome.tokens,
                ..TaskOutput::text(outcome.content)
            }
        } else {
            let written = self.producer.produce(&draft, None).await?;
            TaskOutput { tokens: written.tokens, ..TaskOutput::text(written.content) }
        };

        if let Some((tool, payload)) = tool_call_for(&task.action, Some(&output)) {
            output.metadata = self.tools.execute(tool, payload, job.tool_ctx).await?.into_result(tool)?;
        }
        Ok(output)
    }

    async fn cancel_task(&self, task_id: &str, trace: &TraceReporter) {
        match self.blackboard.cancel_task(&self.token, task_id, "orchestration cancelled").await {
            Ok(()) => trace.emit(TraceEvent::TaskCancelled { task_id: task_id.to_string() }),
            Err(err) => debug!(task_id = %task_id, error = %err, "Task already settled"),
        }
    }

    /// Moves items the executor skipped into a terminal state.
    async fn settle_skipped(&self, run: &DagRun<TaskOutput>, cancel: &CancellationToken) {
        for (task_id, outcome) in &run.outcomes {
            let NodeOutcome::Skipped { failed_dependency } = outcome else {
                continue;
            };
            if cancel.is_cancelled() {
                if let Err(err) = self.blackboard.cancel_task(&self.token, task_id, "orchestration cancelled").await {
                    debug!(task_id = %task_id, error = %err, "Skipped task already settled");
                }
                continue;
            }
            let report = TaskReport {
                task_id: task_id.clone(),
                outcome: TaskOutcome::Failed(format!("dependency {failed_dependency} did not complete")),
                execution_secs: 0.0,
            };
            if let Err(err) = self.blackboard.report_result(&self.token, report).await {
                warn!(task_id = %task_id, error = %err, "Could not record skipped task");
            }
        }
    }

    /// Copies task outputs into the response.
    async fn collect(&self, response: &mut OrchestrateResponse, run: &DagRun<TaskOutput>) {
        let mut failures = Vec::new();
        let mut reviewed = Vec::new();

        for (task_id, _) in &run.outcomes {
            let Some(task) = self.blackboard.task(task_id).await else {
                continue;
            };
            match (task.status, task.output) {
                (TaskStatus::Completed, Some(output)) => {
                    response.iterations_used = response.iterations_used.max(output.iterations);
                    if let Some(approved) = output.approved {
                        reviewed.push(approved);
                    }
                    let Some(content) = output.content else {
                        continue;
                    };
                    match &task.action {
                        ActionKind::GenerateContent { purpose: ContentPurpose::Answer | ContentPurpose::Chat, .. } => {
                            response.messages.push(ResponseMessage::orchestrator(MessageKind::Result, content.clone()));
                        }
                        _ => {
                            let key = task.action.section_id().map_or_else(|| task.id.clone(), str::to_string);
                            response.results.insert(
                                key,
                                SectionResult {
                                    word_count: output.word_count,
                                    score: output.score,
                                    approved: output.approved,
                                    content: content.clone(),
                                },
                            );
                        }
                    }
                    self.blackboard
                        .append_message(
                            ConversationMessage::orchestrator(MessageKind::Result, content).with_metadata(MessageMetadata {
                                tokens: Some(output.tokens),
                                ..MessageMetadata::default()
                            }),
                        )
                        .await;
                }
                (TaskStatus::Failed, _) => {
                    failures.push(format!("{}: {}", task.id, task.error.unwrap_or_default()));
                }
                _ => {}
            }
        }

        if !reviewed.is_empty() {
            response.critic_approved = Some(reviewed.iter().all(|approved| *approved));
        }
        if !response.results.is_empty() {
            response.messages.push(ResponseMessage::orchestrator(
                MessageKind::Result,
                format!("Wrote {} section(s).", response.results.len()),
            ));
        }
        if !failures.is_empty() {
            let summary = format!("{} of {} work item(s) failed: {}", failures.len(), run.outcomes.len(), failures.join("; "));
            response.success = false;
            response.messages.push(ResponseMessage::orchestrator(MessageKind::Error, summary.clone()));
            response.error = Some(summary);
        }
    }

    async fn log_trace(&self, session_id: &str, events: &[TraceEvent]) {
        for event in events {
            let payload = serde_json::json!({ "summary": event.summary(), "event": event });
            self.blackboard
                .log_agent_message(A2AMessage::new(session_id, COORDINATOR_ID, "trace", A2AMessageType::Status, payload))
                .await;
        }
    }

    /// Local pattern pre-screen, no model calls.
    #[must_use]
    pub fn quick_classify(message: &str) -> Option<IntentAnalysis> {
        IntentPipeline::quick_classify(&PipelineContext::new(message))
    }

    /// Board summary, including the worker pool.
    pub async fn stats(&self) -> BlackboardStats {
        self.blackboard.stats().await
    }

    /// Recent allocation decisions, oldest first.
    pub async fn allocation_history(&self) -> Vec<AllocationRecord> {
        self.blackboard.workers().allocation_history().await
    }

    /// Records whether a remembered pattern led to a good result.
    ///
    /// # Errors
    /// `Blackboard(PatternNotFound)` for an unknown id.
    pub async fn record_feedback(&self, pattern_id: &str, success: bool) -> Result<f64> {
        Ok(self.blackboard.record_pattern_outcome(pattern_id, success).await?)
    }
}

fn drain(rx: &mut broadcast::Receiver<TraceEvent>) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "Trace buffer overflowed"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    events
}

const fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Orchestrator => "assistant",
        MessageRole::System => "system",
    }
}

fn user_prompt_for(action: &Action) -> String {
    match &action.kind {
        ActionKind::RequestClarification { question, options } if options.is_empty() => question.clone(),
        ActionKind::RequestClarification { question, options } => format!("{question} Options: {}", options.join(", ")),
        ActionKind::DeleteNode { node_name, node_id } => {
            let target = node_name.as_deref().or(node_id.as_deref()).unwrap_or("this item");
            format!("Delete {target}? Please confirm.")
        }
        other => format!("Please confirm: {}", other.task_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_abstraction::ModelTier;
    use scribe_models::{ScriptedModel, TieredModels};

    fn chat_orchestrator(fast_reply: &str, creative: Arc<ScriptedModel>) -> impl std::future::Future<Output = Result<Orchestrator>> {
        let fast = Arc::new(ScriptedModel::new("fast").then_respond(fast_reply));
        let models = TieredModels::new()
            .with_tier(ModelTier::Fast, fast)
            .with_tier(ModelTier::Smart, Arc::new(ScriptedModel::new("smart")))
            .with_tier(ModelTier::Creative, creative);
        Orchestrator::builder(Arc::new(models)).build()
    }

    #[tokio::test]
    async fn test_chat_reply_is_a_message() {
        let creative = Arc::new(ScriptedModel::new("creative").then_respond("Hello! How can I help with your story?"));
        let orchestrator = chat_orchestrator(
            r#"{"classification":"simple","confidence":0.95,"intent":"general_chat","needs_reasoning":false}"#,
            creative,
        )
        .await
        .unwrap();

        let response = orchestrator.orchestrate(OrchestrateRequest::new("hi there", "s1")).await;

        assert!(response.success, "{response:?}");
        assert_eq!(response.intent, Some(Intent::GeneralChat));
        assert_eq!(response.strategy, Some(ExecutionStrategy::Sequential));
        assert!(response.results.is_empty());
        assert!(response.messages.iter().any(|m| m.content.starts_with("Hello!")));
        assert!(response.pattern_id.is_some());
    }

    #[tokio::test]
    async fn test_conversation_and_trace_are_recorded() {
        let creative = Arc::new(ScriptedModel::new("creative").then_respond("Sure."));
        let orchestrator = chat_orchestrator(
            r#"{"classification":"simple","confidence":0.95,"intent":"general_chat","needs_reasoning":false}"#,
            creative,
        )
        .await
        .unwrap();

        let response = orchestrator.orchestrate(OrchestrateRequest::new("thanks", "s2")).await;

        let turns = orchestrator.blackboard().recent_messages(Some(10)).await;
        assert_eq!(turns[0].role, MessageRole::User);
        assert!(turns.iter().any(|t| t.kind == MessageKind::Decision));

        let logged = orchestrator.blackboard().session_agent_messages("s2").await;
        let statuses = logged.iter().filter(|m| m.kind == A2AMessageType::Status).count();
        assert_eq!(statuses, response.trace.len());
        assert!(matches!(response.trace[0], TraceEvent::IntentResolved { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let creative = Arc::new(ScriptedModel::new("creative"));
        let orchestrator = chat_orchestrator("{}", creative).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = orchestrator.orchestrate_with_cancel(OrchestrateRequest::new("hi", "s3"), cancel).await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Orchestration cancelled"));
        assert!(response.messages.iter().any(|m| m.kind == MessageKind::Thinking));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.refinement.max_iterations = 0;
        let models = TieredModels::uniform(Arc::new(ScriptedModel::new("any")));
        let result = Orchestrator::builder(Arc::new(models)).config(config).build().await;
        assert!(matches!(result, Err(OrchestrationError::Config(_))));
    }

    #[tokio::test]
    async fn test_failed_start_releases_worker() {
        let creative = Arc::new(ScriptedModel::new("creative"));
        let orchestrator = chat_orchestrator("{}", creative).await.unwrap();
        let action = Action::new(
            "t-start",
            ActionKind::GenerateContent {
                document_id: None,
                section_id: None,
                section_name: None,
                prompt: "hi".to_string(),
                purpose: ContentPurpose::Chat,
            },
            crate::actions::Priority::Normal,
        );
        let board = orchestrator.blackboard();
        board.assign_task(&orchestrator.token, Task::from_action("s4", &action)).await.unwrap();
        let record = board.allocate(&orchestrator.token, "t-start", Duration::ZERO).await.unwrap().unwrap();
        board.start_task(&orchestrator.token, "t-start").await.unwrap();

        let result = orchestrator.start_allocated("t-start", &record.worker_id).await;

        assert!(result.is_err());
        let worker = board.get_agent_state(&record.worker_id).await.unwrap();
        assert_eq!(worker.status, crate::workers::WorkerStatus::Idle);
        assert!(worker.current_task.is_none());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: OrchestrateRequest = serde_json::from_str(r#"{"message": "write chapter 1"}"#).unwrap();
        assert!(request.enable_critic);
        assert_eq!(request.max_iterations, 3);
        assert!(!request.competitive);
    }
}
