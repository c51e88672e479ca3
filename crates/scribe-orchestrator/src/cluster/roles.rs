//! Producer and reviewer roles, with the model-backed writer and critic.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use scribe_abstraction::{CompletionRequest, InferenceService, ModelError, ModelTier};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::critique::{parse_critique, Critique};
use crate::intent::truncate;

const WRITER_MAX_TOKENS: u32 = 4000;
const WRITER_TEMPERATURE: f32 = 0.7;
const CRITIC_MAX_TOKENS: u32 = 1000;
const CRITIC_TEMPERATURE: f32 = 0.3;

const WRITER_SYSTEM: &str = "\
You are an expert creative writer. Your task is to generate high-quality content for the given section.

Guidelines:
- Write in a clear, engaging style
- Match the tone and voice of any existing content
- Be creative while staying true to the context
- Use vivid descriptions and strong narrative flow";

const CRITIC_SYSTEM: &str = "\
You are an expert editor and writing critic. Evaluate content quality and give constructive feedback.

Evaluate based on:
1. Clarity and readability
2. Engagement and flow
3. Grammar and style
4. Consistency with context
5. Creativity and originality

Respond with ONLY valid JSON:
{\"score\": 1-10, \"approved\": bool, \"feedback\": \"...\", \"issues\": [...], \"suggestions\": [...], \
\"strengths\": [...], \"dimensions\": {\"clarity\": 1-10, \"engagement\": 1-10, \"grammar\": 1-10, \
\"consistency\": 1-10, \"creativity\": 1-10}}

Score 1-10 where 7 or higher means approved quality.";

/// What a producer is asked to write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftRequest {
    /// Task the draft belongs to.
    pub task_id: String,
    /// Section being written.
    pub section_name: Option<String>,
    /// The user's request.
    pub prompt: String,
    /// Document context.
    pub context: Option<String>,
    /// Current text of the section.
    pub existing_content: Option<String>,
}

impl DraftRequest {
    /// Creates a request for `task_id`.
    #[must_use]
    pub fn new(task_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), prompt: prompt.into(), ..Self::default() }
    }

    /// Sets the section name.
    #[must_use]
    pub fn with_section(mut self, name: Option<String>) -> Self {
        self.section_name = name;
        self
    }

    /// Sets the existing section text.
    #[must_use]
    pub fn with_existing(mut self, content: Option<String>) -> Self {
        self.existing_content = content;
        self
    }

    /// Sets the document context.
    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }
}

/// Feedback on an earlier draft, passed back to the producer.
#[derive(Debug, Clone, Copy)]
pub struct Revision<'a> {
    /// The draft being revised.
    pub draft: &'a str,
    /// What the reviewer said about it.
    pub critique: &'a Critique,
}

/// Produced text with its token cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// The text.
    pub content: String,
    /// Tokens spent.
    pub tokens: u64,
}

/// A verdict with its token cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    /// The verdict.
    pub critique: Critique,
    /// Tokens spent.
    pub tokens: u64,
}

/// Writes drafts.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Writes a first draft, or a revision when `revision` is set.
    async fn produce(&self, request: &DraftRequest, revision: Option<Revision<'_>>) -> Result<Draft, ModelError>;
}

/// Judges drafts. Always yields a verdict.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Reviews `draft` against `threshold`.
    async fn review(&self, request: &DraftRequest, draft: &str, threshold: f32) -> Review;
}

/// Producer backed by the creative tier.
#[derive(Clone)]
pub struct LlmWriter {
    inference: Arc<dyn InferenceService>,
    max_context_chars: usize,
}

impl std::fmt::Debug for LlmWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmWriter").field("max_context_chars", &self.max_context_chars).finish_non_exhaustive()
    }
}

impl LlmWriter {
    /// Creates a writer that keeps at most `max_context_chars` of existing text.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>, max_context_chars: usize) -> Self {
        Self { inference, max_context_chars }
    }

    fn system_prompt(&self, request: &DraftRequest) -> String {
        let mut system = WRITER_SYSTEM.to_string();
        if let Some(context) = request.context.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(system, "\n\nDocument Context:\n{context}");
        }
        if let Some(existing) = request.existing_content.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(system, "\n\nExisting Content:\n{}...", truncate(existing, self.max_context_chars));
        }
        system
    }

    fn user_prompt(&self, request: &DraftRequest, revision: Option<Revision<'_>>) -> String {
        let section = request.section_name.as_deref().unwrap_or("Content");
        let Some(revision) = revision else {
            return format!("Section: {section}\n\nUser request: {}\n\nWrite the content for this section:", request.prompt);
        };

        let critique = revision.critique;
        let mut prompt = format!(
            "Section: {section}\n\nUser request: {}\n\nYour previous draft:\n{}\n\nEditor feedback (score {:.1}/10): {}\n",
            request.prompt,
            truncate(revision.draft, self.max_context_chars),
            critique.score,
            critique.feedback
        );
        for issue in &critique.issues {
            let _ = writeln!(prompt, "- Issue: {issue}");
        }
        for suggestion in &critique.suggestions {
            let _ = writeln!(prompt, "- Suggestion: {suggestion}");
        }
        prompt.push_str("\nRewrite the content for this section, addressing the feedback:");
        prompt
    }
}

#[async_trait]
impl Producer for LlmWriter {
    async fn produce(&self, request: &DraftRequest, revision: Option<Revision<'_>>) -> Result<Draft, ModelError> {
        let completion = CompletionRequest::new(
            ModelTier::Creative,
            self.system_prompt(request),
            self.user_prompt(request, revision),
        )
        .with_max_tokens(WRITER_MAX_TOKENS)
        .with_temperature(WRITER_TEMPERATURE);

        let response = self.inference.complete(completion).await?;
        debug!(task_id = %request.task_id, chars = response.content.len(), "Writer produced draft");
        Ok(Draft { tokens: u64::from(response.total_tokens()), content: response.content })
    }
}

/// Reviewer backed by the smart tier.
#[derive(Clone)]
pub struct LlmCritic {
    inference: Arc<dyn InferenceService>,
    max_review_chars: usize,
}

impl std::fmt::Debug for LlmCritic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCritic").field("max_review_chars", &self.max_review_chars).finish_non_exhaustive()
    }
}

impl LlmCritic {
    /// Creates a critic that reads at most `max_review_chars` of each draft.
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceService>, max_review_chars: usize) -> Self {
        Self { inference, max_review_chars }
    }
}

#[async_trait]
impl Reviewer for LlmCritic {
    async fn review(&self, request: &DraftRequest, draft: &str, threshold: f32) -> Review {
        let completion = CompletionRequest::new(
            ModelTier::Smart,
            CRITIC_SYSTEM,
            format!("Evaluate this content:\n\n{}", truncate(draft, self.max_review_chars)),
        )
        .with_max_tokens(CRITIC_MAX_TOKENS)
        .with_temperature(CRITIC_TEMPERATURE);

        match self.inference.complete(completion).await {
            Ok(response) => {
                let (critique, _) = parse_critique(&response.content, threshold);
                debug!(task_id = %request.task_id, score = critique.score, approved = critique.approved, "Critic reviewed draft");
                Review { critique, tokens: u64::from(response.total_tokens()) }
            }
            Err(err) => {
                warn!(task_id = %request.task_id, error = %err, "Critic call failed");
                Review { critique: Critique::review_failed(err.to_string()), tokens: 0 }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_models::{ScriptedModel, TieredModels};

    #[tokio::test]
    async fn test_writer_prompt_and_parameters() {
        let model = Arc::new(ScriptedModel::new("creative").then_respond("Once upon a time"));
        let writer = LlmWriter::new(Arc::new(TieredModels::uniform(model.clone())), 10);
        let request = DraftRequest::new("t1", "Write the opening")
            .with_section(Some("Chapter 1".to_string()))
            .with_existing(Some("x".repeat(50)));

        let draft = writer.produce(&request, None).await.unwrap();
        assert_eq!(draft.content, "Once upon a time");

        let call = &model.calls()[0];
        assert_eq!(call.temperature, Some(WRITER_TEMPERATURE));
        assert_eq!(call.max_tokens, Some(WRITER_MAX_TOKENS));
        assert!(call.user.starts_with("Section: Chapter 1\n\nUser request: Write the opening"));
        assert!(call.system.as_deref().unwrap().contains(&format!("{}...", "x".repeat(10))));
        assert!(!call.system.as_deref().unwrap().contains(&"x".repeat(11)));
    }

    #[tokio::test]
    async fn test_revision_prompt_carries_feedback() {
        let model = Arc::new(ScriptedModel::new("creative").then_respond("better"));
        let writer = LlmWriter::new(Arc::new(TieredModels::uniform(model.clone())), 2000);
        let mut critique = Critique::review_failed("x");
        critique.suggestions = vec!["Add dialogue".to_string()];

        writer
            .produce(&DraftRequest::new("t1", "Write"), Some(Revision { draft: "first try", critique: &critique }))
            .await
            .unwrap();

        let user = &model.calls()[0].user;
        assert!(user.contains("Your previous draft:\nfirst try"));
        assert!(user.contains("- Suggestion: Add dialogue"));
    }

    #[tokio::test]
    async fn test_critic_truncates_and_degrades() {
        let model = Arc::new(ScriptedModel::new("smart").then_respond(r#"{"score": 9}"#));
        let critic = LlmCritic::new(Arc::new(TieredModels::uniform(model.clone())), 5);

        let review = critic.review(&DraftRequest::new("t1", "p"), "abcdefghij", 7.0).await;
        assert!(review.critique.approved);
        assert_eq!(model.calls()[0].user, "Evaluate this content:\n\nabcde");
        assert_eq!(model.calls()[0].temperature, Some(CRITIC_TEMPERATURE));

        // The script is exhausted now, so the call fails.
        let review = critic.review(&DraftRequest::new("t1", "p"), "draft", 7.0).await;
        assert!(!review.critique.approved);
        assert!(review.critique.issues[0].starts_with("review failed"));
    }
}
