//! Inference abstraction layer for Scribe.
//!
//! Defines the traits and types the orchestration core uses to talk to
//! language models. Two levels are exposed:
//!
//! - [`Model`]: a single concrete model (one provider, one model id).
//! - [`InferenceService`]: the tier-aware boundary the orchestrator consumes,
//!   `complete(tier, system, user, max_tokens, temperature) -> text`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when interacting with an AI model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// An error occurred during the API request (e.g., network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error (e.g., invalid input, rate limiting).
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The model provider is not supported or configured.
    #[error("Unsupported Model Provider: {0}")]
    UnsupportedModelProvider(String),

    /// Provider quota exceeded or rate limit hit.
    #[error("Provider '{provider}' quota exceeded{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    QuotaExceeded {
        /// The provider name (e.g., "anthropic").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// No model is configured for the requested tier.
    #[error("No model configured for tier '{0}'")]
    TierUnavailable(ModelTier),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Returns true if retrying the same request later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestError(_) | Self::QuotaExceeded { .. })
    }
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where the API will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self { temperature: Some(0.7), top_p: Some(1.0), max_tokens: Some(512), stop_sequences: None }
    }
}

/// The response from a text generation or chat completion model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<ModelUsage>,
}

impl ModelResponse {
    /// Total tokens reported for this response, zero when the provider gave no usage.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.usage.as_ref().map_or(0, |u| u.total_tokens)
    }
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// A trait for interacting with different AI models.
///
/// All models must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates a text completion based on the given prompt.
    ///
    /// # Arguments
    /// * `prompt` - The input prompt for text generation
    /// * `parameters` - Optional parameters to control generation
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Generates a chat completion based on the given conversation history.
    ///
    /// # Arguments
    /// * `messages` - The conversation history as a slice of chat messages
    /// * `parameters` - Optional parameters to control generation
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;
}

/// Capability tier of a model.
///
/// The orchestrator never names concrete models; it asks for a tier and the
/// inference service maps the tier to a configured model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, low-latency classification and review.
    Fast,
    /// Stronger reasoning used for escalation and deep analysis.
    Smart,
    /// Long-form creative generation.
    Creative,
}

impl ModelTier {
    /// Returns the tier name as used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Smart => "smart",
            Self::Creative => "creative",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "smart" => Ok(Self::Smart),
            "creative" => Ok(Self::Creative),
            other => Err(ModelError::Other(format!("unknown model tier: {other}"))),
        }
    }
}

/// A single tiered completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Which tier should serve the request.
    pub tier: ModelTier,
    /// System instructions.
    pub system_prompt: String,
    /// User-turn content.
    pub user_prompt: String,
    /// Generation cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl CompletionRequest {
    /// Creates a request with the tier's customary defaults (1000 tokens, temperature 0.2).
    #[must_use]
    pub fn new(tier: ModelTier, system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            tier,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: 1000,
            temperature: 0.2,
        }
    }

    /// Sets the generation cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builds the chat transcript sent to a [`Model`].
    #[must_use]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system_prompt.clone()), ChatMessage::user(self.user_prompt.clone())]
    }

    /// Builds the generation parameters sent to a [`Model`].
    #[must_use]
    pub fn parameters(&self) -> ModelParameters {
        ModelParameters {
            temperature: Some(self.temperature),
            top_p: None,
            max_tokens: Some(self.max_tokens),
            stop_sequences: None,
        }
    }
}

/// The inference boundary consumed by the orchestration core.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Runs one completion on the model serving `request.tier`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the tier is not configured or the call fails.
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_is_case_insensitive() {
        assert_eq!("Smart".parse::<ModelTier>().unwrap(), ModelTier::Smart);
        assert_eq!("fast".parse::<ModelTier>().unwrap(), ModelTier::Fast);
        assert!("turbo".parse::<ModelTier>().is_err());
    }

    #[test]
    fn test_completion_request_messages_carry_system_first() {
        let request = CompletionRequest::new(ModelTier::Fast, "be brief", "hello").with_max_tokens(64);
        let messages = request.to_messages();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "hello");
        assert_eq!(request.parameters().max_tokens, Some(64));
    }

    #[test]
    fn test_quota_error_display_includes_message() {
        let err = ModelError::QuotaExceeded {
            provider: "anthropic".to_string(),
            message: Some("slow down".to_string()),
        };
        assert_eq!(err.to_string(), "Provider 'anthropic' quota exceeded: slow down");
        assert!(err.is_transient());
        assert!(!ModelError::TierUnavailable(ModelTier::Creative).is_transient());
    }
}
