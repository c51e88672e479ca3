//! The four-stage intent pipeline.
//!
//! Pattern pre-screen, triage (with escalation), context resolution, deep
//! analysis when triage is not enough, then validation.

use std::sync::Arc;

use scribe_abstraction::InferenceService;
use serde::Serialize;
use tracing::{debug, info};

use super::context::{ContextResolver, ResolvedContext};
use super::deep::{DeepAnalyzer, FALLBACK_QUESTION};
use super::patterns;
use super::triage::TriageStage;
use super::types::{Classification, Intent, IntentAnalysis, PipelineContext, TriageResult};
use super::validation::{validate, ValidationReport, ValidationSettings};
use crate::config::TriageConfig;
use crate::documents::DocumentSnapshot;

/// Everything the pipeline decided for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    /// Pattern pre-screen verdict, if any.
    pub pattern_hint: Option<IntentAnalysis>,
    /// Triage verdict.
    pub triage: TriageResult,
    /// Resolved references.
    #[serde(skip)]
    pub resolved: ResolvedContext,
    /// Deep analysis ran.
    pub deep_ran: bool,
    /// Validation report holding the final analysis.
    pub report: ValidationReport,
}

impl PipelineOutcome {
    /// The final, validated analysis.
    #[must_use]
    pub fn analysis(&self) -> &IntentAnalysis {
        &self.report.analysis
    }
}

/// Classifies requests into validated [`IntentAnalysis`] values.
#[derive(Clone)]
pub struct IntentPipeline {
    triage: TriageStage,
    deep: DeepAnalyzer,
    config: TriageConfig,
}

impl std::fmt::Debug for IntentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentPipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

impl IntentPipeline {
    /// Creates a pipeline over `inference`.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>, config: TriageConfig) -> Self {
        Self {
            triage: TriageStage::new(Arc::clone(&inference), config.clone()),
            deep: DeepAnalyzer::new(inference),
            config,
        }
    }

    /// Pattern-only classification. No model calls.
    #[must_use]
    pub fn quick_classify(ctx: &PipelineContext) -> Option<IntentAnalysis> {
        patterns::classify(ctx)
    }

    /// Why deep analysis must run, if it must.
    #[must_use]
    pub fn deep_analysis_reason(&self, triage: &TriageResult, ctx: &PipelineContext, resolved: &ResolvedContext) -> Option<&'static str> {
        if triage.classification == Classification::Ambiguous {
            Some("ambiguous request")
        } else if triage.confidence < self.config.deep_analysis_threshold {
            Some("triage confidence below deep-analysis threshold")
        } else if triage.intent.is_none() {
            Some("triage resolved no intent")
        } else if triage.intent.is_some_and(Intent::is_canvas_sensitive) {
            Some("intent depends on canvas state")
        } else if resolved.canvas_match.is_some() && !ctx.document_panel_open {
            Some("request names a canvas document")
        } else {
            None
        }
    }

    /// Runs every stage for `ctx`.
    ///
    /// Never fails: every model-backed stage has a conservative fallback.
    pub async fn analyze(&self, ctx: &PipelineContext, snapshot: &DocumentSnapshot) -> PipelineOutcome {
        let pattern_hint = Self::quick_classify(ctx);
        let triage = self.triage.run(ctx, pattern_hint.as_ref()).await;
        let resolved = ContextResolver::resolve(ctx, snapshot);

        let reason = self.deep_analysis_reason(&triage, ctx, &resolved);
        let analysis = match reason {
            Some(reason) => {
                debug!(reason, "Running deep analysis");
                self.deep.analyze(ctx, &triage, &resolved).await
            }
            None => Self::from_triage(&triage, pattern_hint.as_ref(), &resolved),
        };

        let settings = ValidationSettings { min_confidence: self.config.min_valid_confidence };
        let report = validate(analysis, ctx, &settings);
        info!(
            intent = %report.analysis.intent,
            confidence = report.analysis.confidence,
            escalated = triage.was_escalated,
            deep = reason.is_some(),
            needs_clarification = report.analysis.needs_clarification,
            "Intent resolved"
        );

        PipelineOutcome { pattern_hint, triage, resolved, deep_ran: reason.is_some(), report }
    }

    /// Final analysis when triage alone settled the intent.
    fn from_triage(triage: &TriageResult, hint: Option<&IntentAnalysis>, resolved: &ResolvedContext) -> IntentAnalysis {
        let Some(intent) = triage.intent else {
            return super::deep::fallback_analysis("triage resolved no intent");
        };
        let mut analysis = IntentAnalysis::new(intent, triage.confidence, triage.reasoning.clone());
        analysis.used_llm = true;
        analysis.entities = resolved.entities.clone();
        if let Some(hint) = hint.filter(|h| h.intent == intent) {
            analysis.suggested_action.clone_from(&hint.suggested_action);
            analysis.requires_context = hint.requires_context;
        }
        if intent == Intent::ClarificationNeeded {
            analysis.ask(FALLBACK_QUESTION);
        }
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{Document, Section};
    use crate::intent::types::{CanvasContext, CanvasNode};
    use scribe_abstraction::ModelTier;
    use scribe_models::{ScriptedModel, TieredModels};

    fn pipeline(fast: ScriptedModel, smart: ScriptedModel) -> (IntentPipeline, Arc<ScriptedModel>, Arc<ScriptedModel>) {
        let fast = Arc::new(fast);
        let smart = Arc::new(smart);
        let models = TieredModels::new().with_tier(ModelTier::Fast, fast.clone()).with_tier(ModelTier::Smart, smart.clone());
        (IntentPipeline::new(Arc::new(models), TriageConfig::default()), fast, smart)
    }

    fn chapters() -> DocumentSnapshot {
        let mut doc = Document::new("doc-1", "Novel", "novel");
        for n in 1..=3 {
            doc.sections.push(Section::new(format!("ch{n}"), format!("Chapter {n}"), 1));
        }
        DocumentSnapshot::new(vec![doc], Some("doc-1".to_string()))
    }

    #[tokio::test]
    async fn test_confident_triage_skips_deep_analysis() {
        let (pipeline, _, smart) = pipeline(
            ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.93,"intent":"write_content"}"#),
            ScriptedModel::new("smart"),
        );
        let ctx = PipelineContext::new("Write chapter 1, chapter 2, and chapter 3").with_panel_open("novel");
        let outcome = pipeline.analyze(&ctx, &chapters()).await;

        assert!(!outcome.deep_ran);
        assert_eq!(smart.call_count(), 0);
        assert_eq!(outcome.analysis().intent, Intent::WriteContent);
        assert_eq!(outcome.analysis().entities.sections.len(), 3);
        assert!(outcome.report.is_valid());
    }

    #[tokio::test]
    async fn test_canvas_sensitive_intent_forces_deep_analysis() {
        let (pipeline, _, smart) = pipeline(
            ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.97,"intent":"create_structure"}"#),
            ScriptedModel::new("smart").then_respond(r#"{"intent":"create_structure","confidence":0.92,"reasoning":"no podcast exists"}"#),
        );
        let outcome = pipeline.analyze(&PipelineContext::new("Create a podcast"), &DocumentSnapshot::default()).await;

        assert!(outcome.deep_ran);
        assert_eq!(smart.call_count(), 1);
        assert_eq!(outcome.analysis().intent, Intent::CreateStructure);
        assert_eq!(outcome.analysis().entities.document_format.as_deref(), Some("podcast"));
        assert_eq!(outcome.pattern_hint.as_ref().map(|h| h.intent), Some(Intent::CreateStructure));
    }

    #[tokio::test]
    async fn test_named_canvas_document_forces_deep_analysis() {
        let (pipeline, _, _) = pipeline(
            ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.9,"intent":"write_content"}"#),
            ScriptedModel::new("smart").then_respond(r#"{"intent":"open_and_write","confidence":0.9}"#),
        );
        let ctx = PipelineContext::new("write the intro in our podcast").with_canvas(CanvasContext {
            connected_nodes: vec![CanvasNode { node_id: "n7".into(), node_type: "podcast".into(), label: "Weekly".into() }],
            total_nodes: 1,
        });
        let outcome = pipeline.analyze(&ctx, &DocumentSnapshot::default()).await;

        assert!(outcome.deep_ran);
        assert_eq!(outcome.analysis().intent, Intent::OpenAndWrite);
        assert_eq!(outcome.analysis().entities.source_node.as_deref(), Some("n7"));
    }

    #[tokio::test]
    async fn test_total_failure_asks_for_clarification() {
        let (pipeline, _, smart) = pipeline(ScriptedModel::new("fast"), ScriptedModel::new("smart"));
        let outcome = pipeline.analyze(&PipelineContext::new("blorp"), &DocumentSnapshot::default()).await;

        // Escalation and deep analysis each made one call.
        assert_eq!(smart.call_count(), 2);
        assert!(outcome.triage.was_escalated);
        assert_eq!(outcome.analysis().intent, Intent::GeneralChat);
        assert!(outcome.analysis().needs_clarification);
        assert_eq!(outcome.analysis().clarifying_question.as_deref(), Some(FALLBACK_QUESTION));
    }

    #[test]
    fn test_quick_classify_is_local() {
        let ctx = PipelineContext::new("Go to chapter 2").with_panel_open("novel");
        assert_eq!(IntentPipeline::quick_classify(&ctx).map(|a| a.intent), Some(Intent::NavigateSection));
    }
}
