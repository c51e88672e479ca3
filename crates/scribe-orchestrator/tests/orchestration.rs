//! End-to-end runs of the orchestrator against scripted models.

use std::sync::Arc;
use std::time::Duration;

use scribe_abstraction::ModelTier;
use scribe_models::{ScriptedModel, TieredModels};
use scribe_orchestrator::actions::templates_for;
use scribe_orchestrator::intent::{ActiveSegment, CanvasContext, CanvasNode, StructureItem};
use scribe_orchestrator::tools::{OPEN_DOCUMENT, WRITE_CONTENT};
use scribe_orchestrator::{
    ActionKind, Document, DocumentSnapshot, ExecutionStrategy, InMemoryDocuments, Intent, OrchestrateRequest,
    Orchestrator, RecordingToolExecutor, Section, TaskStatus, TraceEvent, WorkerStatus,
};
use tokio_util::sync::CancellationToken;

const WRITE_TRIAGE: &str = r#"{"classification":"simple","confidence":0.95,"intent":"write_content"}"#;

struct Models {
    fast: Arc<ScriptedModel>,
    smart: Arc<ScriptedModel>,
    creative: Arc<ScriptedModel>,
}

impl Models {
    fn new(fast: ScriptedModel, smart: ScriptedModel, creative: ScriptedModel) -> Self {
        Self { fast: Arc::new(fast), smart: Arc::new(smart), creative: Arc::new(creative) }
    }

    fn router(&self) -> Arc<TieredModels> {
        Arc::new(
            TieredModels::new()
                .with_tier(ModelTier::Fast, self.fast.clone())
                .with_tier(ModelTier::Smart, self.smart.clone())
                .with_tier(ModelTier::Creative, self.creative.clone()),
        )
    }
}

fn novel() -> DocumentSnapshot {
    let mut doc = Document::new("doc-1", "The Lighthouse", "novel");
    for n in 1..=3 {
        doc.sections.push(Section::new(format!("ch{n}"), format!("Chapter {n}"), 1));
    }
    DocumentSnapshot::new(vec![doc], Some("doc-1".to_string()))
}

fn novel_with_epilogue() -> DocumentSnapshot {
    let mut doc = Document::new("doc-1", "The Lighthouse", "novel");
    for n in 1..=2 {
        doc.sections.push(Section::new(format!("ch{n}"), format!("Chapter {n}"), 1));
    }
    doc.sections.push(Section::new("ep", "Epilogue", 1));
    DocumentSnapshot::new(vec![doc], Some("doc-1".to_string()))
}

async fn orchestrator(models: &Models, tools: Arc<RecordingToolExecutor>) -> Orchestrator {
    orchestrator_over(models, tools, novel()).await
}

async fn orchestrator_over(models: &Models, tools: Arc<RecordingToolExecutor>, snapshot: DocumentSnapshot) -> Orchestrator {
    Orchestrator::builder(models.router())
        .documents(Arc::new(InMemoryDocuments::from_snapshot(snapshot)))
        .tools(tools)
        .build()
        .await
        .unwrap()
}

/// Outline shown in the editor: two chapters and an epilogue.
fn outline_request(session: &str) -> OrchestrateRequest {
    let mut request =
        OrchestrateRequest::new("Write Chapter 1, Chapter 2, and the Epilogue", session).with_panel_open("novel");
    request.structure_items =
        vec![StructureItem::new("ch1", "Chapter 1"), StructureItem::new("ch2", "Chapter 2"), StructureItem::new("ep", "Epilogue")];
    request.enable_critic = false;
    request
}

fn writing_models() -> Models {
    Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart"),
        ScriptedModel::new("creative").with_responder(|_| Ok("The tide turned.".to_string())),
    )
}

fn critic_reply(score: u32) -> String {
    format!(r#"{{"score": {score}, "approved": {}, "feedback": "noted", "suggestions": ["tighten"]}}"#, score >= 7)
}

#[tokio::test]
async fn test_three_chapters_run_as_one_parallel_batch() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.93,"intent":"write_content"}"#),
        ScriptedModel::new("smart"),
        ScriptedModel::new("creative")
            .with_delay(Duration::from_millis(100))
            .with_responder(|_| Ok("The keeper climbed the stairs.".to_string())),
    );
    let tools = Arc::new(RecordingToolExecutor::new());
    let orchestrator = orchestrator(&models, tools.clone()).await;

    let request = OrchestrateRequest::new("Write chapter 1, chapter 2, and chapter 3", "s-par").with_panel_open("novel");
    let response = orchestrator.orchestrate(request).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.strategy, Some(ExecutionStrategy::Parallel));
    assert_eq!(response.results.keys().collect::<Vec<_>>(), ["ch1", "ch2", "ch3"]);

    let batches: Vec<_> = response
        .trace
        .iter()
        .filter_map(|e| match e {
            TraceEvent::BatchStarted { task_ids, .. } => Some(task_ids.len()),
            _ => None,
        })
        .collect();
    assert_eq!(batches, [3]);
    assert_eq!(models.creative.peak_concurrency(), 3);
    assert_eq!(models.smart.call_count(), 0);

    assert_eq!(tools.calls_to(WRITE_CONTENT).len(), 3);
    let history = orchestrator.allocation_history().await;
    assert_eq!(history.len(), 3);
    let mut workers: Vec<_> = history.iter().map(|r| r.worker_id.as_str()).collect();
    workers.sort_unstable();
    workers.dedup();
    assert_eq!(workers.len(), 3);
}

#[tokio::test]
async fn test_new_podcast_asks_for_a_template() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.97,"intent":"create_structure"}"#),
        ScriptedModel::new("smart").then_respond(r#"{"intent":"create_structure","confidence":0.92,"reasoning":"no podcast exists"}"#),
        ScriptedModel::new("creative"),
    );
    let orchestrator = Orchestrator::builder(models.router()).build().await.unwrap();

    let response = orchestrator.orchestrate(OrchestrateRequest::new("Create a podcast", "s-pod")).await;

    assert!(response.success);
    assert!(response.requires_user_input);
    assert_eq!(response.intent, Some(Intent::CreateStructure));
    assert_eq!(response.strategy, None);
    assert_eq!(models.smart.call_count(), 1);
    assert_eq!(models.creative.call_count(), 0);

    let ActionKind::RequestClarification { options, .. } = &response.actions[0].kind else {
        panic!("expected a clarification, got {:?}", response.actions);
    };
    let expected: Vec<String> = templates_for("podcast").iter().map(|t| (*t).to_string()).collect();
    assert_eq!(options, &expected);
    assert!(orchestrator.blackboard().tasks().await.is_empty());
}

#[tokio::test]
async fn test_low_confidence_triage_escalates_once() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(r#"{"classification":"ambiguous","confidence":0.4,"intent":"general_chat"}"#),
        ScriptedModel::new("smart").then_respond(r#"{"classification":"simple","confidence":0.85,"intent":"answer_question"}"#),
        ScriptedModel::new("creative").then_respond("A beat sheet lists the turning points of a story."),
    );
    let orchestrator = Orchestrator::builder(models.router()).build().await.unwrap();

    let response = orchestrator.orchestrate(OrchestrateRequest::new("what's a beat sheet?", "s-esc")).await;

    assert!(response.success);
    assert_eq!(models.smart.call_count(), 1);
    assert_eq!(response.intent, Some(Intent::AnswerQuestion));
    assert!(matches!(response.trace[0], TraceEvent::IntentResolved { escalated: true, .. }));
    assert!(response.messages.iter().any(|m| m.content.starts_with("A beat sheet")));
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_unapproved_drafts_stop_at_the_iteration_cap() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart").with_responder(|_| Ok(critic_reply(4))),
        ScriptedModel::new("creative").with_responder(|_| Ok("Waves hit the rocks.".to_string())),
    );
    let orchestrator = orchestrator(&models, Arc::new(RecordingToolExecutor::new())).await;

    let request = OrchestrateRequest::new("Write the opening of this chapter", "s-loop")
        .with_panel_open("novel")
        .with_active_segment(ActiveSegment::new("ch1", "Chapter 1"));
    let response = orchestrator.orchestrate(request).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.strategy, Some(ExecutionStrategy::Cluster));
    assert_eq!(models.creative.call_count(), 4);
    assert_eq!(models.smart.call_count(), 4);
    assert_eq!(response.iterations_used, 4);
    assert_eq!(response.critic_approved, Some(false));
    assert_eq!(response.results["ch1"].approved, Some(false));
    assert!(models.creative.calls()[1].user.contains("Your previous draft:"));
}

#[tokio::test]
async fn test_approved_first_draft_ends_the_loop() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart").with_responder(|_| Ok(critic_reply(9))),
        ScriptedModel::new("creative").with_responder(|_| Ok("Waves hit the rocks.".to_string())),
    );
    let orchestrator = orchestrator(&models, Arc::new(RecordingToolExecutor::new())).await;

    let request = OrchestrateRequest::new("Write the opening of this chapter", "s-ok")
        .with_panel_open("novel")
        .with_active_segment(ActiveSegment::new("ch1", "Chapter 1"));
    let response = orchestrator.orchestrate(request).await;

    assert_eq!(models.creative.call_count(), 1);
    assert_eq!(models.smart.call_count(), 1);
    assert_eq!(response.critic_approved, Some(true));
    assert_eq!(response.iterations_used, 1);
    let task = &orchestrator.blackboard().tasks().await[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.constraints.requires_review);
}

#[tokio::test]
async fn test_competitive_drafts_seed_the_loop() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart").with_responder(|_| Ok(critic_reply(8))),
        ScriptedModel::new("creative").with_responder(|_| Ok("Fog rolled in.".to_string())),
    );
    let orchestrator = orchestrator(&models, Arc::new(RecordingToolExecutor::new())).await;

    let mut request = OrchestrateRequest::new("Write the opening of this chapter", "s-best")
        .with_panel_open("novel")
        .with_active_segment(ActiveSegment::new("ch1", "Chapter 1"));
    request.competitive = true;
    let response = orchestrator.orchestrate(request).await;

    let n = orchestrator.config().refinement.best_of_n;
    assert_eq!(models.creative.call_count(), n);
    assert_eq!(models.smart.call_count(), n);
    assert_eq!(response.critic_approved, Some(true));
}

#[tokio::test]
async fn test_failed_write_is_reported_not_thrown() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart"),
        ScriptedModel::new("creative").then_respond("Gulls circled."),
    );
    let tools = Arc::new(RecordingToolExecutor::new().failing(WRITE_CONTENT, "document is read-only"));
    let orchestrator = orchestrator(&models, tools).await;

    let mut request = OrchestrateRequest::new("Write the opening of this chapter", "s-fail")
        .with_panel_open("novel")
        .with_active_segment(ActiveSegment::new("ch1", "Chapter 1"));
    request.enable_critic = false;
    let response = orchestrator.orchestrate(request).await;

    assert!(!response.success);
    assert_eq!(response.strategy, Some(ExecutionStrategy::Sequential));
    let error = response.error.unwrap();
    assert!(error.starts_with("1 of 1 work item(s) failed"), "{error}");
    assert!(error.contains("read-only"));

    let task = &orchestrator.blackboard().tasks().await[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(orchestrator.blackboard().get_all_agents().await.iter().all(|w| w.status == WorkerStatus::Idle));
}

#[tokio::test]
async fn test_cancellation_releases_workers() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(WRITE_TRIAGE),
        ScriptedModel::new("smart"),
        ScriptedModel::new("creative").with_delay(Duration::from_secs(5)).then_respond("never seen"),
    );
    let orchestrator = orchestrator(&models, Arc::new(RecordingToolExecutor::new())).await;

    let mut request = OrchestrateRequest::new("Write the opening of this chapter", "s-cancel")
        .with_panel_open("novel")
        .with_active_segment(ActiveSegment::new("ch1", "Chapter 1"));
    request.enable_critic = false;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let response = orchestrator.orchestrate_with_cancel(request, cancel).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Orchestration cancelled"));
    assert!(response.trace.iter().any(|e| matches!(e, TraceEvent::TaskCancelled { .. })));

    let tasks = orchestrator.blackboard().tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Cancelled);
    assert!(orchestrator.blackboard().get_all_agents().await.iter().all(|w| w.status == WorkerStatus::Idle));
}

#[tokio::test]
async fn test_feedback_updates_learned_pattern() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":1.0,"intent":"general_chat"}"#),
        ScriptedModel::new("smart"),
        ScriptedModel::new("creative").then_respond("Happy to help."),
    );
    let orchestrator = Orchestrator::builder(models.router()).build().await.unwrap();

    let response = orchestrator.orchestrate(OrchestrateRequest::new("thank you!", "s-fb")).await;
    let pattern_id = response.pattern_id.expect("confident run should be remembered");

    let rate = orchestrator.record_feedback(&pattern_id, false).await.unwrap();
    assert!((rate - 0.7).abs() < 1e-9);
    assert!(orchestrator.record_feedback("missing", true).await.is_err());
}

#[tokio::test]
async fn test_items_for_missing_sections_are_filtered_before_strategy() {
    let models = writing_models();
    let tools = Arc::new(RecordingToolExecutor::new());
    // The store has not created the epilogue yet.
    let orchestrator = orchestrator(&models, tools.clone()).await;

    let response = orchestrator.orchestrate(outline_request("s-filter")).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.actions.len(), 3);
    let filtered: Vec<_> = response
        .trace
        .iter()
        .filter_map(|e| match e {
            TraceEvent::ActionsFiltered { action_ids, .. } => Some(action_ids.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(filtered.len(), 1);
    let epilogue = response.actions.iter().find(|a| a.kind.section_id() == Some("ep")).unwrap();
    assert_eq!(filtered[0], vec![epilogue.id.clone()]);

    // Two remaining items are below the parallel threshold.
    assert_eq!(response.strategy, Some(ExecutionStrategy::Sequential));
    assert_eq!(response.results.keys().collect::<Vec<_>>(), ["ch1", "ch2"]);
    assert_eq!(orchestrator.blackboard().tasks().await.len(), 2);
    assert_eq!(models.creative.call_count(), 2);
    assert_eq!(tools.calls_to(WRITE_CONTENT).len(), 2);
}

#[tokio::test]
async fn test_items_for_existing_sections_all_run() {
    let models = writing_models();
    let tools = Arc::new(RecordingToolExecutor::new());
    let orchestrator = orchestrator_over(&models, tools.clone(), novel_with_epilogue()).await;

    let response = orchestrator.orchestrate(outline_request("s-ready")).await;

    assert!(response.success, "{:?}", response.error);
    assert!(!response.trace.iter().any(|e| matches!(e, TraceEvent::ActionsFiltered { .. })));
    assert_eq!(response.strategy, Some(ExecutionStrategy::Parallel));
    assert_eq!(response.results.keys().collect::<Vec<_>>(), ["ch1", "ch2", "ep"]);
    assert_eq!(tools.calls_to(WRITE_CONTENT).len(), 3);
}

#[tokio::test]
async fn test_open_and_write_opens_then_writes() {
    let models = Models::new(
        ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.95,"intent":"open_and_write"}"#),
        ScriptedModel::new("smart")
            .then_respond(r#"{"intent":"open_and_write","confidence":0.92,"reasoning":"Winter Tale is on the canvas"}"#),
        ScriptedModel::new("creative").then_respond("Snow covered the village."),
    );
    let tools = Arc::new(RecordingToolExecutor::new());
    let orchestrator = Orchestrator::builder(models.router()).tools(tools.clone()).build().await.unwrap();

    let canvas = CanvasContext {
        connected_nodes: vec![CanvasNode {
            node_id: "n7".to_string(),
            node_type: "novel".to_string(),
            label: "Winter Tale".to_string(),
        }],
        total_nodes: 1,
    };
    let mut request = OrchestrateRequest::new("continue writing in Winter Tale", "s-open").with_canvas(canvas);
    request.enable_critic = false;
    let response = orchestrator.orchestrate(request).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.intent, Some(Intent::OpenAndWrite));
    assert!(!response.trace.iter().any(|e| matches!(e, TraceEvent::ActionsFiltered { .. })));

    let opened = tools.calls_to(OPEN_DOCUMENT);
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].payload["node_id"], "n7");
    let written = tools.calls_to(WRITE_CONTENT);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].payload["document_id"], "n7");
    assert_eq!(written[0].payload["content"], "Snow covered the village.");
    assert_eq!(models.creative.call_count(), 1);

    // The write ran in a later batch than the open.
    let batches = response.trace.iter().filter(|e| matches!(e, TraceEvent::BatchStarted { .. })).count();
    assert_eq!(batches, 2);
}
