//! Orchestrate and classify commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use scribe_abstraction::{InferenceService, ModelTier};
use scribe_models::{ModelFactory, ModelType};
use scribe_orchestrator::blackboard::MessageKind;
use scribe_orchestrator::intent::ActiveSegment;
use scribe_orchestrator::{
    DocumentSnapshot, InMemoryDocuments, OrchestrateRequest, OrchestrateResponse, Orchestrator, OrchestratorConfig,
    RecordingToolExecutor,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Arguments of `scribe orchestrate`.
#[derive(Args, Debug)]
pub struct OrchestrateArgs {
    /// The request, e.g. "Write chapter 1 and chapter 2"
    pub message: String,

    /// Session id (a new one is generated when omitted)
    #[arg(long)]
    pub session: Option<String>,

    /// User id passed to tools
    #[arg(long, default_value = "cli")]
    pub user: String,

    /// JSON file with a document snapshot ({"documents": [...], "active": "id"})
    #[arg(long)]
    pub documents: Option<PathBuf>,

    /// Format of the open document; implied by the snapshot's active document
    #[arg(long)]
    pub format: Option<String>,

    /// Selected section id
    #[arg(long, requires = "section_name")]
    pub section_id: Option<String>,

    /// Selected section name
    #[arg(long, requires = "section_id")]
    pub section_name: Option<String>,

    /// Skip the producer/reviewer loop
    #[arg(long)]
    pub no_critic: bool,

    /// Start reviewed items from competing drafts
    #[arg(long)]
    pub competitive: bool,

    /// Revision cap for reviewed items
    #[arg(long, default_value_t = 3)]
    pub max_iterations: u32,

    /// Use the offline mock model for every tier
    #[arg(long)]
    pub mock: bool,

    /// Print the full response as JSON
    #[arg(long)]
    pub json: bool,
}

fn inference(config: &OrchestratorConfig, mock: bool) -> anyhow::Result<Arc<dyn InferenceService>> {
    let provider = if mock { ModelType::Mock } else { config.models.provider.parse()? };
    let tiers = [
        (ModelTier::Fast, config.models.fast.clone()),
        (ModelTier::Smart, config.models.smart.clone()),
        (ModelTier::Creative, config.models.creative.clone()),
    ];
    Ok(Arc::new(ModelFactory::create_tiered(provider, &tiers)?))
}

fn load_snapshot(path: &Path) -> anyhow::Result<DocumentSnapshot> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn request_for(args: &OrchestrateArgs, snapshot: &DocumentSnapshot) -> OrchestrateRequest {
    let session = args.session.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut request = OrchestrateRequest::new(args.message.clone(), session);
    request.user_id.clone_from(&args.user);
    request.enable_critic = !args.no_critic;
    request.competitive = args.competitive;
    request.max_iterations = args.max_iterations;

    let format = args.format.clone().or_else(|| snapshot.active_document().map(|d| d.format.clone()));
    if let Some(format) = format {
        request = request.with_panel_open(format);
    }
    if let (Some(id), Some(name)) = (&args.section_id, &args.section_name) {
        let mut segment = ActiveSegment::new(id.clone(), name.clone());
        segment.has_content = snapshot.section_content(id).is_some_and(|c| !c.is_empty());
        request = request.with_active_segment(segment);
    }
    request
}

/// Execute the orchestrate command.
pub async fn execute(args: OrchestrateArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let snapshot = match &args.documents {
        Some(path) => load_snapshot(path)?,
        None => DocumentSnapshot::default(),
    };

    let orchestrator = Orchestrator::builder(inference(&config, args.mock)?)
        .config(config)
        .documents(Arc::new(InMemoryDocuments::from_snapshot(snapshot.clone())))
        .tools(Arc::new(RecordingToolExecutor::new()))
        .build()
        .await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let response = orchestrator.orchestrate_with_cancel(request_for(&args, &snapshot), cancel).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_human(&response);
    }

    match &response.error {
        Some(error) => anyhow::bail!("{error}"),
        None => Ok(()),
    }
}

fn print_human(response: &OrchestrateResponse) {
    let intent = response.intent.map_or_else(|| "unknown".to_string(), |i| i.to_string());
    println!("{} {} ({:.2})", "Intent:".bold(), intent.cyan(), response.confidence);
    if let Some(strategy) = response.strategy {
        println!("{} {}", "Strategy:".bold(), strategy.to_string().cyan());
    }
    println!();

    for message in &response.messages {
        let line = match message.kind {
            MessageKind::Error => message.content.red(),
            MessageKind::Warning => message.content.yellow(),
            MessageKind::Decision => message.content.bold(),
            _ => message.content.normal(),
        };
        println!("{line}");
    }

    for (section, result) in &response.results {
        println!();
        let verdict = match (result.score, result.approved) {
            (Some(score), Some(true)) => format!(" [approved, {score:.1}/10]").green(),
            (Some(score), _) => format!(" [not approved, {score:.1}/10]").yellow(),
            _ => "".normal(),
        };
        println!("{}{verdict} {}", section.bold(), format!("{} words", result.word_count).dimmed());
        println!("{}", result.content);
    }

    if response.requires_user_input {
        println!();
        println!("{}", "Waiting for your answer.".yellow());
    }
}

/// Execute the classify command.
pub fn classify(message: &str) -> anyhow::Result<()> {
    match Orchestrator::quick_classify(message) {
        Some(analysis) => println!("{}", serde_json::to_string_pretty(&analysis)?),
        None => println!("{}", "No local pattern matched; the full pipeline would ask the models.".yellow()),
    }
    Ok(())
}
