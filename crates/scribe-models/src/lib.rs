//! Model implementations for Scribe.
//!
//! This crate provides concrete implementations of the `Model` trait and the
//! tier router that implements `InferenceService` on top of them.
//!
//! # Providers
//!
//! - **Mock**: deterministic echo model for development
//! - **Scripted**: replays queued responses and records every call (tests)
//! - **Claude**: Anthropic's Claude models (API key required)

pub mod claude;
pub mod factory;
pub mod scripted;
pub mod tiered;

use async_trait::async_trait;
use scribe_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

pub use claude::ClaudeModel;
pub use factory::{ModelConfig, ModelFactory, ModelType};
pub use scripted::{RecordedCall, ScriptedModel};
pub use tiered::TieredModels;

/// A mock implementation of the `Model` trait for development runs.
///
/// Replies with a short summary of the last user turn so that pipelines can
/// run end to end without network access.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.generate_chat_completion(&[ChatMessage::user(prompt)], parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockModel generating chat completion"
        );

        let last_user = messages.iter().rev().find(|m| m.role == "user").map_or("", |m| m.content.as_str());
        let content = format!("Mock response from {} for: {last_user}", self.id);

        let prompt_tokens = messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
        let completion_tokens = count_tokens(&content);

        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
pub(crate) fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
