//! Deep analysis: the full-context model pass that settles the intent.

use std::sync::Arc;

use scribe_abstraction::{CompletionRequest, InferenceService, ModelTier};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::context::ResolvedContext;
use super::prompts;
use super::types::{ExtractedEntities, Intent, IntentAnalysis, PipelineContext, SuggestedModel, TriageResult};
use crate::decode::{decode, Decode, FieldScan};

const DEEP_MAX_TOKENS: u32 = 1000;
const DEEP_TEMPERATURE: f32 = 0.2;

/// Question asked when the request could not be understood at all.
pub const FALLBACK_QUESTION: &str =
    "I'm not sure I understood your request. Could you please clarify what you'd like me to do?";

#[derive(Debug, Clone, Deserialize)]
struct DeepReply {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "suggestedAction")]
    suggested_action: String,
    #[serde(default, alias = "requiresContext")]
    requires_context: Option<bool>,
    #[serde(default, alias = "suggestedModel")]
    suggested_model: Option<String>,
    #[serde(default, alias = "needsClarification")]
    needs_clarification: bool,
    #[serde(default, alias = "clarifyingQuestion")]
    clarifying_question: Option<String>,
    #[serde(default, alias = "extractedEntities")]
    extracted_entities: Option<Value>,
}

impl Decode for DeepReply {
    fn from_fields(fields: &FieldScan<'_>) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let confidence = fields.number("confidence").map(|c| c as f32);
        Some(Self {
            intent: fields.string("intent")?,
            confidence,
            reasoning: fields.string("reasoning").unwrap_or_default(),
            suggested_action: fields.string("suggested_action").unwrap_or_default(),
            requires_context: fields.boolean("requires_context"),
            suggested_model: fields.string("suggested_model"),
            needs_clarification: fields.boolean("needs_clarification").unwrap_or(false),
            clarifying_question: fields.string("clarifying_question"),
            extracted_entities: None,
        })
    }

    fn fallback(_raw: &str) -> Self {
        Self {
            intent: Intent::GeneralChat.as_str().to_string(),
            confidence: None,
            reasoning: String::new(),
            suggested_action: String::new(),
            requires_context: None,
            suggested_model: None,
            needs_clarification: true,
            clarifying_question: None,
            extracted_entities: None,
        }
    }
}

/// Reads entity fields from the model's free-form object, snake or camel case.
fn entities_from_value(value: &Value) -> ExtractedEntities {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
            .map(ToString::to_string)
    };
    ExtractedEntities {
        target_section: text(&["target_section", "targetSection", "target_segment", "targetSegment"]),
        target_section_name: text(&["target_section_name", "targetSectionName"]),
        sections: Vec::new(),
        source_node: text(&["source_node", "sourceNode", "node_id", "nodeId"]),
        source_document: text(&["source_document", "sourceDocument"]),
        template: text(&["template"]).map(|t| t.to_lowercase().replace(' ', "-")),
        document_format: text(&["document_format", "documentFormat", "format"]).map(|f| f.to_lowercase()),
    }
}

/// The analysis returned when deep analysis cannot produce anything usable.
#[must_use]
pub fn fallback_analysis(reason: impl Into<String>) -> IntentAnalysis {
    let mut analysis = IntentAnalysis::new(Intent::GeneralChat, 0.3, reason);
    analysis.ask(FALLBACK_QUESTION);
    analysis.used_llm = true;
    analysis
}

/// Full-context intent analysis on the smart tier.
#[derive(Clone)]
pub struct DeepAnalyzer {
    inference: Arc<dyn InferenceService>,
}

impl std::fmt::Debug for DeepAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepAnalyzer").finish_non_exhaustive()
    }
}

impl DeepAnalyzer {
    /// Creates the analyzer.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>) -> Self {
        Self { inference }
    }

    /// Resolves the final intent for `ctx`.
    ///
    /// Entities grounded by the resolver win over entities the model reports.
    /// Failures degrade to [`fallback_analysis`].
    pub async fn analyze(&self, ctx: &PipelineContext, triage: &TriageResult, resolved: &ResolvedContext) -> IntentAnalysis {
        let request = CompletionRequest::new(
            ModelTier::Smart,
            prompts::deep_system(ctx, triage),
            prompts::deep_user(&ctx.message),
        )
        .with_max_tokens(DEEP_MAX_TOKENS)
        .with_temperature(DEEP_TEMPERATURE);

        let raw = match self.inference.complete(request).await {
            Ok(response) => response.content,
            Err(err) => {
                warn!(error = %err, "Deep analysis call failed");
                return fallback_analysis(format!("deep analysis failed: {err}"));
            }
        };

        let decoded = decode::<DeepReply>(&raw);
        if !decoded.stage.is_parsed() {
            warn!("Deep analysis reply unparseable, asking the user");
            return fallback_analysis("deep analysis reply could not be parsed");
        }
        let reply = decoded.value;
        let Ok(intent) = reply.intent.parse::<Intent>() else {
            warn!(intent = %reply.intent, "Deep analysis named an unknown intent");
            return fallback_analysis(format!("unknown intent `{}`", reply.intent));
        };

        let mut analysis = IntentAnalysis::new(intent, reply.confidence.unwrap_or(triage.confidence), reply.reasoning);
        analysis.used_llm = true;
        analysis.suggested_action = reply.suggested_action;
        if let Some(requires_context) = reply.requires_context {
            analysis.requires_context = requires_context;
        }
        if let Some(model) = reply.suggested_model.as_deref().and_then(|m| m.parse::<SuggestedModel>().ok()) {
            analysis.suggested_model = model;
        }

        analysis.entities = resolved.entities.clone();
        if let Some(value) = &reply.extracted_entities {
            analysis.entities.fill_from(&entities_from_value(value));
        }

        let question = reply.clarifying_question.filter(|q| !q.trim().is_empty());
        if reply.needs_clarification || intent == Intent::ClarificationNeeded {
            analysis.ask(question.unwrap_or_else(|| FALLBACK_QUESTION.to_string()));
        }

        info!(
            intent = %analysis.intent,
            confidence = analysis.confidence,
            needs_clarification = analysis.needs_clarification,
            stage = %decoded.stage,
            "Deep analysis resolved intent"
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::types::{CanvasNode, SectionRef};
    use scribe_abstraction::ModelError;
    use scribe_models::ScriptedModel;

    fn analyzer(model: ScriptedModel) -> (DeepAnalyzer, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let tiers = scribe_models::TieredModels::uniform(model.clone());
        (DeepAnalyzer::new(Arc::new(tiers)), model)
    }

    fn triage() -> TriageResult {
        TriageResult::safe_default("test")
    }

    #[tokio::test]
    async fn test_camel_case_reply_with_entities() {
        let (deep, model) = analyzer(ScriptedModel::new("smart").then_respond(
            r#"```json
{"intent":"create_structure","confidence":0.88,"reasoning":"new podcast","suggestedModel":"orchestrator",
 "needsClarification":false,"extractedEntities":{"documentFormat":"Podcast","template":"Solo Episode"}}
```"#,
        ));
        let analysis = deep.analyze(&PipelineContext::new("Create a podcast"), &triage(), &ResolvedContext::default()).await;

        assert_eq!(analysis.intent, Intent::CreateStructure);
        assert!(analysis.used_llm);
        assert_eq!(analysis.entities.document_format.as_deref(), Some("podcast"));
        assert_eq!(analysis.entities.template.as_deref(), Some("solo-episode"));

        let call = &model.calls()[0];
        assert_eq!(call.temperature, Some(DEEP_TEMPERATURE));
        assert_eq!(call.max_tokens, Some(DEEP_MAX_TOKENS));
        assert!(call.system.as_deref().unwrap_or_default().contains("CLOSED"));
    }

    #[tokio::test]
    async fn test_resolver_entities_take_precedence() {
        let (deep, _) = analyzer(ScriptedModel::new("smart").then_respond(
            r#"{"intent":"open_and_write","confidence":0.9,"extracted_entities":{"source_node":"guess","template":"interview"}}"#,
        ));
        let resolved = ResolvedContext {
            entities: ExtractedEntities {
                source_node: Some("n2".to_string()),
                sections: vec![SectionRef { id: "s1".into(), name: "Intro".into() }],
                ..ExtractedEntities::default()
            },
            canvas_match: Some(CanvasNode { node_id: "n2".into(), node_type: "podcast".into(), label: "Show".into() }),
        };
        let analysis = deep.analyze(&PipelineContext::new("write in our podcast"), &triage(), &resolved).await;

        assert_eq!(analysis.intent, Intent::OpenAndWrite);
        assert_eq!(analysis.entities.source_node.as_deref(), Some("n2"));
        assert_eq!(analysis.entities.template.as_deref(), Some("interview"));
        assert_eq!(analysis.entities.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_clarifying_chat() {
        for model in [
            ScriptedModel::new("smart").then_fail(ModelError::RequestError("down".to_string())),
            ScriptedModel::new("smart").then_respond("no idea, really"),
            ScriptedModel::new("smart").then_respond(r#"{"intent":"summon_dragon","confidence":0.99}"#),
        ] {
            let (deep, _) = analyzer(model);
            let analysis = deep.analyze(&PipelineContext::new("???"), &triage(), &ResolvedContext::default()).await;
            assert_eq!(analysis.intent, Intent::GeneralChat);
            assert!((analysis.confidence - 0.3).abs() < f32::EPSILON);
            assert!(analysis.needs_clarification);
            assert_eq!(analysis.clarifying_question.as_deref(), Some(FALLBACK_QUESTION));
        }
    }

    #[tokio::test]
    async fn test_model_requested_clarification_keeps_question() {
        let (deep, _) = analyzer(ScriptedModel::new("smart").then_respond(
            r#"{"intent":"delete_node","confidence":0.6,"needs_clarification":true,"clarifying_question":"Which draft?"}"#,
        ));
        let analysis = deep.analyze(&PipelineContext::new("delete the draft"), &triage(), &ResolvedContext::default()).await;
        assert_eq!(analysis.intent, Intent::DeleteNode);
        assert_eq!(analysis.clarifying_question.as_deref(), Some("Which draft?"));
    }
}
