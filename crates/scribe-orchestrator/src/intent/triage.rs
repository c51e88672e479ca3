//! Triage: fast classification with escalation to the smart tier.

use std::sync::Arc;

use scribe_abstraction::{CompletionRequest, InferenceService, ModelTier};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::prompts;
use super::types::{Classification, Intent, IntentAnalysis, PipelineContext, TriageResult};
use crate::config::TriageConfig;
use crate::decode::{decode, Decode, FieldScan};

const FAST_MAX_TOKENS: u32 = 500;
const FAST_TEMPERATURE: f32 = 0.1;
const ESCALATION_MAX_TOKENS: u32 = 800;
const ESCALATION_TEMPERATURE: f32 = 0.2;

/// Raw triage verdict as a model writes it.
#[derive(Debug, Clone, Deserialize)]
struct TriageReply {
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default, alias = "needsReasoning")]
    needs_reasoning: bool,
    #[serde(default, alias = "needsMoreContext")]
    needs_more_context: bool,
    #[serde(default)]
    reasoning: String,
}

impl Decode for TriageReply {
    fn from_fields(fields: &FieldScan<'_>) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let confidence = fields.number("confidence")? as f32;
        Some(Self {
            classification: fields.string("classification"),
            confidence: Some(confidence),
            intent: fields.string("intent"),
            needs_reasoning: fields.boolean("needs_reasoning").unwrap_or(false),
            needs_more_context: fields.boolean("needs_more_context").unwrap_or(false),
            reasoning: fields.string("reasoning").unwrap_or_default(),
        })
    }

    fn fallback(_raw: &str) -> Self {
        Self {
            classification: None,
            confidence: None,
            intent: None,
            needs_reasoning: true,
            needs_more_context: true,
            reasoning: String::new(),
        }
    }
}

impl TriageReply {
    fn into_result(self) -> TriageResult {
        TriageResult {
            classification: self
                .classification
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(Classification::Complex),
            confidence: self.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            intent: self.intent.as_deref().and_then(|i| i.parse::<Intent>().ok()),
            needs_reasoning: self.needs_reasoning,
            needs_more_context: self.needs_more_context,
            escalation_reason: None,
            was_escalated: false,
            reasoning: self.reasoning,
        }
    }
}

/// Parses a triage reply. `None` when nothing usable was found.
fn parse_reply(raw: &str) -> Option<TriageResult> {
    let decoded = decode::<TriageReply>(raw);
    if decoded.stage.is_parsed() {
        debug!(stage = %decoded.stage, "Triage reply decoded");
        Some(decoded.value.into_result())
    } else {
        None
    }
}

/// First stage of the intent pipeline.
#[derive(Clone)]
pub struct TriageStage {
    inference: Arc<dyn InferenceService>,
    config: TriageConfig,
}

impl std::fmt::Debug for TriageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageStage").field("config", &self.config).finish_non_exhaustive()
    }
}

impl TriageStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>, config: TriageConfig) -> Self {
        Self { inference, config }
    }

    /// Why `result` should go to the smart tier, if it should.
    #[must_use]
    pub fn escalation_reason(&self, result: &TriageResult) -> Option<String> {
        if result.confidence < self.config.escalation_confidence_threshold {
            Some(format!(
                "confidence {:.2} below {:.2}",
                result.confidence, self.config.escalation_confidence_threshold
            ))
        } else if result.needs_reasoning && result.confidence < self.config.escalation_reasoning_threshold {
            Some(format!(
                "reasoning required and confidence {:.2} below {:.2}",
                result.confidence, self.config.escalation_reasoning_threshold
            ))
        } else {
            None
        }
    }

    /// Classifies `ctx.message`, escalating at most once.
    ///
    /// Never fails: unusable model output degrades to
    /// [`TriageResult::safe_default`].
    pub async fn run(&self, ctx: &PipelineContext, hint: Option<&IntentAnalysis>) -> TriageResult {
        let request = CompletionRequest::new(ModelTier::Fast, prompts::TRIAGE_SYSTEM, prompts::triage_user(ctx, hint))
            .with_max_tokens(FAST_MAX_TOKENS)
            .with_temperature(FAST_TEMPERATURE);

        let (fast, fast_reply) = match self.inference.complete(request).await {
            Ok(response) => match parse_reply(&response.content) {
                Some(result) => (result, response.content),
                None => {
                    warn!("Fast triage reply unparseable, using safe default");
                    (TriageResult::safe_default("fast triage reply could not be parsed"), response.content)
                }
            },
            Err(err) => {
                warn!(error = %err, "Fast triage call failed, using safe default");
                (TriageResult::safe_default(format!("fast triage call failed: {err}")), String::new())
            }
        };
        debug!(
            classification = ?fast.classification,
            confidence = fast.confidence,
            intent = ?fast.intent,
            "Fast triage verdict"
        );

        let Some(reason) = self.escalation_reason(&fast) else {
            return fast;
        };
        warn!(reason = %reason, "Escalating triage to smart tier");
        let result = self.escalate(ctx, fast, &reason, &fast_reply).await;
        info!(
            confidence = result.confidence,
            intent = ?result.intent,
            "Escalated triage verdict"
        );
        result
    }

    async fn escalate(&self, ctx: &PipelineContext, fast: TriageResult, reason: &str, fast_reply: &str) -> TriageResult {
        let request = CompletionRequest::new(
            ModelTier::Smart,
            prompts::ESCALATION_SYSTEM,
            prompts::escalation_user(ctx, &fast, reason, fast_reply),
        )
        .with_max_tokens(ESCALATION_MAX_TOKENS)
        .with_temperature(ESCALATION_TEMPERATURE);

        let escalated = match self.inference.complete(request).await {
            Ok(response) => parse_reply(&response.content),
            Err(err) => {
                warn!(error = %err, "Escalation call failed");
                None
            }
        };

        let mut result = match escalated {
            Some(smart) if smart.confidence >= fast.confidence => smart,
            Some(smart) => {
                debug!(
                    fast = fast.confidence,
                    smart = smart.confidence,
                    "Escalated verdict less confident, keeping fast verdict"
                );
                fast
            }
            None => TriageResult::safe_default("escalated triage produced no usable verdict"),
        };
        result.was_escalated = true;
        result.escalation_reason = Some(reason.to_string());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_abstraction::ModelError;
    use scribe_models::{ScriptedModel, TieredModels};

    fn build(fast: ScriptedModel, smart: ScriptedModel) -> (TriageStage, Arc<ScriptedModel>, Arc<ScriptedModel>) {
        let fast = Arc::new(fast);
        let smart = Arc::new(smart);
        let models = TieredModels::new().with_tier(ModelTier::Fast, fast.clone()).with_tier(ModelTier::Smart, smart.clone());
        (TriageStage::new(Arc::new(models), TriageConfig::default()), fast, smart)
    }

    #[tokio::test]
    async fn test_confident_fast_pass_is_final() {
        let (stage, _, smart) = build(
            ScriptedModel::new("fast").then_respond(
                r#"{"classification":"simple","confidence":0.92,"intent":"write_content","needs_reasoning":false}"#,
            ),
            ScriptedModel::new("smart"),
        );
        let result = stage.run(&PipelineContext::new("write chapter 1"), None).await;

        assert_eq!(result.intent, Some(Intent::WriteContent));
        assert!(!result.was_escalated);
        assert_eq!(smart.call_count(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_exactly_once() {
        let (stage, _, smart) = build(
            ScriptedModel::new("fast")
                .then_respond(r#"{"classification":"ambiguous","confidence":0.4,"intent":"general_chat"}"#),
            ScriptedModel::new("smart").then_respond(
                "```json\n{\"classification\":\"simple\",\"confidence\":0.85,\"intent\":\"answer_question\"}\n```",
            ),
        );
        let result = stage.run(&PipelineContext::new("so what about the ending"), None).await;

        assert_eq!(smart.call_count(), 1);
        assert!(result.was_escalated);
        assert_eq!(result.intent, Some(Intent::AnswerQuestion));
        assert!(result.escalation_reason.unwrap().contains("0.40"));
        assert!(smart.calls()[0].user.contains("First pass verdict"));
    }

    #[tokio::test]
    async fn test_reasoning_threshold_escalates() {
        let (stage, _, smart) = build(
            ScriptedModel::new("fast").then_respond(
                r#"{"classification":"complex","confidence":0.75,"intent":"rewrite_with_coherence","needs_reasoning":true}"#,
            ),
            ScriptedModel::new("smart").then_respond(r#"{"classification":"complex","confidence":0.6}"#),
        );
        let result = stage.run(&PipelineContext::new("fix the timeline"), None).await;

        assert_eq!(smart.call_count(), 1);
        assert!(result.was_escalated);
        assert_eq!(result.intent, Some(Intent::RewriteWithCoherence));
        assert!((result.confidence - 0.75).abs() < f32::EPSILON);
        assert!(result.escalation_reason.unwrap().starts_with("reasoning required"));
    }

    #[tokio::test]
    async fn test_failed_fast_call_is_safe_default_then_escalates() {
        let (stage, _, smart) = build(
            ScriptedModel::new("fast").then_fail(ModelError::RequestError("timeout".to_string())),
            ScriptedModel::new("smart").then_respond("I cannot answer in JSON, sorry."),
        );
        let result = stage.run(&PipelineContext::new("hello"), None).await;

        assert_eq!(smart.call_count(), 1);
        assert_eq!(result.classification, Classification::Complex);
        assert!((result.confidence - 0.5).abs() < f32::EPSILON);
        assert!(result.needs_reasoning && result.needs_more_context);
        assert!(result.was_escalated);
        assert!(result.escalation_reason.is_some());
        assert!(result.intent.is_none());
    }

    #[tokio::test]
    async fn test_prose_wrapped_reply_and_field_recovery() {
        let (stage, _, _) = build(
            ScriptedModel::new("fast").then_respond(
                "Sure! Here you go: {\"classification\": \"simple\", \"confidence\": 0.9, \"intent\": \"delete_node\"} Hope it helps.",
            ),
            ScriptedModel::new("smart"),
        );
        let result = stage.run(&PipelineContext::new("remove it"), None).await;
        assert_eq!(result.intent, Some(Intent::DeleteNode));

        let (stage, _, _) = build(
            ScriptedModel::new("fast").then_respond("classification: simple\nconfidence: 0.88\nintent: navigate_section"),
            ScriptedModel::new("smart"),
        );
        let result = stage.run(&PipelineContext::new("go to the end"), None).await;
        assert_eq!(result.intent, Some(Intent::NavigateSection));
        assert!(!result.was_escalated);
    }

    #[tokio::test]
    async fn test_pattern_hint_reaches_prompt() {
        let (stage, fast, _) = build(
            ScriptedModel::new("fast").then_respond(r#"{"classification":"simple","confidence":0.95,"intent":"create_structure"}"#),
            ScriptedModel::new("smart"),
        );
        let hint = IntentAnalysis::new(Intent::CreateStructure, 0.9, "pattern");
        stage.run(&PipelineContext::new("Create a podcast"), Some(&hint)).await;

        let call = &fast.calls()[0];
        assert!(call.user.contains("pre-screen suggests `create_structure`"));
        assert_eq!(call.temperature, Some(FAST_TEMPERATURE));
    }
}
