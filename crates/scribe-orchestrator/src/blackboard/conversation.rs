//! Conversation turns recorded on the blackboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intent::Intent;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The end user.
    User,
    /// The orchestration core.
    Orchestrator,
    /// Infrastructure notices.
    System,
}

/// What a conversation turn is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Intermediate reasoning shown to the user.
    Thinking,
    /// A decision such as the chosen strategy.
    Decision,
    /// Work being delegated.
    Task,
    /// Output of delegated work.
    Result,
    /// A failure.
    Error,
    /// Progress while work runs.
    Progress,
    /// A degraded path was taken.
    Warning,
}

/// Optional annotations on a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Resolved intent, when the turn is about classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Confidence attached to the intent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Model that produced the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tokens spent producing the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

/// One turn in the dialogue. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique id.
    pub id: String,
    /// Author.
    pub role: MessageRole,
    /// Text.
    pub content: String,
    /// When it was written.
    pub timestamp: DateTime<Utc>,
    /// Kind of turn.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ConversationMessage {
    /// Creates a turn stamped now.
    #[must_use]
    pub fn new(role: MessageRole, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            kind,
            metadata: None,
        }
    }

    /// Shorthand for a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageKind::Task, content)
    }

    /// Shorthand for an orchestrator turn.
    #[must_use]
    pub fn orchestrator(kind: MessageKind, content: impl Into<String>) -> Self {
        Self::new(MessageRole::Orchestrator, kind, content)
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
