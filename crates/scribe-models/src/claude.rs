//! Anthropic Messages API client.
//!
//! System messages are lifted out of the transcript and sent through the
//! dedicated `system` field; every other turn is mapped to `user` or
//! `assistant`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scribe_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Claude model implementation.
#[derive(Debug, Clone)]
pub struct ClaudeModel {
    /// The model ID (e.g., "claude-sonnet-4-5-20250929").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl ClaudeModel {
    /// Creates a new `ClaudeModel` reading the key from `ANTHROPIC_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not set.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `ClaudeModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self { model_id, api_key, base_url: DEFAULT_BASE_URL.to_string(), client: Client::new() }
    }

    /// Points the client at a different endpoint (proxies, test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_claude_message(msg: &ChatMessage) -> ClaudeMessage {
        ClaudeMessage {
            role: if msg.role == "assistant" { "assistant" } else { "user" }.to_string(),
            content: msg.content.clone(),
        }
    }

    /// Joins every system message into the dedicated `system` field.
    fn extract_system_prompt(messages: &[ChatMessage]) -> Option<String> {
        let parts: Vec<&str> =
            messages.iter().filter(|msg| msg.role == "system").map(|msg| msg.content.as_str()).collect();
        if parts.is_empty() { None } else { Some(parts.join("\n\n")) }
    }

    /// Maps a non-success HTTP status and body to a `ModelError`.
    ///
    /// 402 and 429 are quota errors. Anything else is a response error.
    fn error_for_status(status: StatusCode, body: String) -> ModelError {
        if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
            return ModelError::QuotaExceeded { provider: "anthropic".to_string(), message: Some(body) };
        }

        let is_quota_type = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| {
                json.get("error")
                    .and_then(|e| e.get("type"))
                    .or_else(|| json.get("type"))
                    .and_then(|t| t.as_str())
                    .map(|t| matches!(t, "rate_limit_error" | "overloaded_error" | "insufficient_quota"))
            })
            .unwrap_or(false);

        if is_quota_type {
            ModelError::QuotaExceeded { provider: "anthropic".to_string(), message: Some(body) }
        } else {
            ModelError::ModelResponseError(format!("API error ({status}): {body}"))
        }
    }
}

#[async_trait]
impl Model for ClaudeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let messages = vec![ChatMessage::user(prompt)];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "ClaudeModel generating chat completion"
        );

        let url = format!("{}/messages", self.base_url);
        let mut request_body = ClaudeRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .filter(|msg| msg.role != "system")
                .map(Self::to_claude_message)
                .collect(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Self::extract_system_prompt(messages),
            temperature: None,
            top_p: None,
            stop_sequences: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            if let Some(max_tokens) = params.max_tokens {
                request_body.max_tokens = max_tokens;
            }
            request_body.stop_sequences = params.stop_sequences;
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to Claude API");
                ModelError::RequestError(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %body, "Claude API returned error status");
            return Err(Self::error_for_status(status, body));
        }

        let claude_response: ClaudeResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Claude API response");
            ModelError::SerializationError(format!("Failed to parse response: {e}"))
        })?;

        let content = claude_response
            .content
            .iter()
            .find(|c| c.content_type == "text")
            .map(|c| c.text.clone())
            .ok_or_else(|| ModelError::ModelResponseError("No text content in API response".to_string()))?;

        let usage = ModelUsage {
            prompt_tokens: claude_response.usage.input_tokens,
            completion_tokens: claude_response.usage.output_tokens,
            total_tokens: claude_response.usage.input_tokens + claude_response.usage.output_tokens,
        };

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage: Some(usage) })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompts_are_joined() {
        let messages = vec![
            ChatMessage::system("You are an editor."),
            ChatMessage::system("Reply in JSON."),
            ChatMessage::user("Hello"),
        ];
        let system = ClaudeModel::extract_system_prompt(&messages);
        assert_eq!(system.as_deref(), Some("You are an editor.\n\nReply in JSON."));
        assert_eq!(ClaudeModel::extract_system_prompt(&[ChatMessage::user("hi")]), None);
    }

    #[test]
    fn test_status_mapping() {
        let err = ClaudeModel::error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow".to_string());
        assert!(matches!(err, ModelError::QuotaExceeded { .. }));

        let body = r#"{"error":{"type":"overloaded_error","message":"busy"}}"#.to_string();
        let err = ClaudeModel::error_for_status(StatusCode::SERVICE_UNAVAILABLE, body);
        assert!(matches!(err, ModelError::QuotaExceeded { .. }));

        let err = ClaudeModel::error_for_status(StatusCode::BAD_REQUEST, "bad".to_string());
        assert!(matches!(err, ModelError::ModelResponseError(_)));
    }

    #[tokio::test]
    async fn test_generate_against_local_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"text","text":"Once upon a time"}],"usage":{"input_tokens":12,"output_tokens":4}}"#,
            )
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-test".to_string(), "test-key".to_string())
            .with_base_url(server.url());
        let messages = vec![ChatMessage::system("Write."), ChatMessage::user("Begin")];
        let response = model.generate_chat_completion(&messages, None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "Once upon a time");
        assert_eq!(response.total_tokens(), 16);
    }

    #[tokio::test]
    async fn test_quota_status_from_server() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(429)
            .with_body(r#"{"error":{"type":"rate_limit_error","message":"Rate limit exceeded"}}"#)
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-test".to_string(), "k".to_string())
            .with_base_url(server.url());
        let err = model.generate_text("hi", None).await.unwrap_err();
        assert!(matches!(err, ModelError::QuotaExceeded { ref provider, .. } if provider == "anthropic"));
    }
}
