// Tool execution boundary
//
// The orchestrator decides what to change and in which order; a tool
// executor applies the change (writes text into a document, creates a
// structure, navigates). Nothing in this crate mutates documents directly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::actions::{ActionKind, ContentPurpose};
use crate::blackboard::TaskOutput;
use crate::error::ToolError;

/// Writes or replaces section text.
pub const WRITE_CONTENT: &str = "write_content";
/// Creates a document from a template.
pub const CREATE_STRUCTURE: &str = "create_structure";
/// Adds, moves or removes sections.
pub const MODIFY_STRUCTURE: &str = "modify_structure";
/// Selects a section in the open document.
pub const NAVIGATE: &str = "navigate";
/// Opens a canvas document.
pub const OPEN_DOCUMENT: &str = "open_document";
/// Deletes a canvas node.
pub const DELETE_NODE: &str = "delete_node";

/// Every tool name the coordinator may call.
pub const TOOL_NAMES: [&str; 6] = [WRITE_CONTENT, CREATE_STRUCTURE, MODIFY_STRUCTURE, NAVIGATE, OPEN_DOCUMENT, DELETE_NODE];

/// Caller identity passed to every tool call.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    /// End user the change is made for.
    pub user_id: String,
    /// Opaque credentials forwarded from the request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("user_id", &self.user_id)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a tool reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The change was applied.
    pub success: bool,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool-specific details (new ids, timestamps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn ok(metadata: Option<Value>) -> Self {
        Self { success: true, error: None, metadata }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), metadata: None }
    }

    /// Converts a reported failure into a [`ToolError`].
    ///
    /// # Errors
    /// `ToolError::Failed` when `success` is false.
    pub fn into_result(self, tool: &str) -> Result<Option<Value>, ToolError> {
        if self.success {
            Ok(self.metadata)
        } else {
            Err(ToolError::Failed {
                tool: tool.to_string(),
                reason: self.error.unwrap_or_else(|| "no reason given".to_string()),
            })
        }
    }
}

/// Applies side-effecting changes on behalf of the coordinator.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs `tool` with `payload`.
    ///
    /// # Errors
    /// Returns `ToolError::UnknownTool` for names the executor does not serve.
    async fn execute(&self, tool: &str, payload: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError>;
}

/// The tool call that applies a finished action, if any.
///
/// Chat replies and answers are returned as messages and need no tool.
/// Clarifications never reach a tool.
#[must_use]
pub fn tool_call_for(action: &ActionKind, output: Option<&TaskOutput>) -> Option<(&'static str, Value)> {
    let content = output.and_then(|o| o.content.clone());
    match action {
        ActionKind::GenerateContent { purpose: ContentPurpose::Answer | ContentPurpose::Chat, .. }
        | ActionKind::RequestClarification { .. } => None,
        ActionKind::GenerateContent { document_id, section_id, section_name, .. } => Some((
            WRITE_CONTENT,
            json!({
                "document_id": document_id,
                "section_id": section_id,
                "section_name": section_name,
                "content": content,
                "mode": "append",
            }),
        )),
        ActionKind::ImproveContent { document_id, section_id, section_name, .. } => Some((
            WRITE_CONTENT,
            json!({
                "document_id": document_id,
                "section_id": section_id,
                "section_name": section_name,
                "content": content,
                "mode": "replace",
            }),
        )),
        ActionKind::GenerateStructure { format, template, prompt } => {
            Some((CREATE_STRUCTURE, json!({ "format": format, "template": template, "prompt": prompt })))
        }
        ActionKind::ModifyStructure { document_id, prompt } => {
            Some((MODIFY_STRUCTURE, json!({ "document_id": document_id, "prompt": prompt })))
        }
        ActionKind::SelectSection { section_id, section_name } => {
            Some((NAVIGATE, json!({ "section_id": section_id, "section_name": section_name })))
        }
        ActionKind::OpenDocument { node_id, node_name } => {
            Some((OPEN_DOCUMENT, json!({ "node_id": node_id, "node_name": node_name })))
        }
        ActionKind::DeleteNode { node_id, node_name } => {
            Some((DELETE_NODE, json!({ "node_id": node_id, "node_name": node_name })))
        }
    }
}

/// One call seen by a [`RecordingToolExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool: String,
    /// Payload.
    pub payload: Value,
    /// Caller.
    pub user_id: String,
}

/// Executor that applies nothing and records every call.
///
/// Used by the CLI's dry runs and by tests.
#[derive(Debug, Default)]
pub struct RecordingToolExecutor {
    calls: Mutex<Vec<ToolCallRecord>>,
    failing: Mutex<BTreeMap<String, String>>,
}

impl RecordingToolExecutor {
    /// Creates an executor where every known tool succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `tool` report failure with `reason`.
    #[must_use]
    pub fn failing(self, tool: &str, reason: &str) -> Self {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(tool.to_string(), reason.to_string());
        self
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<ToolCallRecord> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls made to `tool`.
    pub fn calls_to(&self, tool: &str) -> Vec<ToolCallRecord> {
        self.calls().into_iter().filter(|c| c.tool == tool).collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingToolExecutor {
    async fn execute(&self, tool: &str, payload: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        if !TOOL_NAMES.contains(&tool) {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }
        debug!(tool, user_id = %ctx.user_id, "Recording tool call");
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(ToolCallRecord {
            tool: tool.to_string(),
            payload,
            user_id: ctx.user_id.clone(),
        });

        let failure = self.failing.lock().unwrap_or_else(PoisonError::into_inner).get(tool).cloned();
        Ok(match failure {
            Some(reason) => ToolOutcome::failed(reason),
            None => ToolOutcome::ok(Some(json!({ "tool": tool, "recorded": true }))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers_need_no_tool() {
        let answer = ActionKind::GenerateContent {
            document_id: None,
            section_id: None,
            section_name: None,
            prompt: "what is a beat sheet?".to_string(),
            purpose: ContentPurpose::Answer,
        };
        assert!(tool_call_for(&answer, None).is_none());
    }

    #[test]
    fn test_section_content_is_written() {
        let action = ActionKind::GenerateContent {
            document_id: Some("doc-1".to_string()),
            section_id: Some("ch-1".to_string()),
            section_name: Some("Chapter 1".to_string()),
            prompt: "write".to_string(),
            purpose: ContentPurpose::Section,
        };
        let output = TaskOutput::text("It was a dark night.");

        let (tool, payload) = tool_call_for(&action, Some(&output)).unwrap();
        assert_eq!(tool, WRITE_CONTENT);
        assert_eq!(payload["section_id"], "ch-1");
        assert_eq!(payload["content"], "It was a dark night.");
    }

    #[tokio::test]
    async fn test_recording_executor() {
        let executor = RecordingToolExecutor::new().failing(NAVIGATE, "no such section");
        let ctx = ToolContext { user_id: "u1".to_string(), ..ToolContext::default() };

        let outcome = executor.execute(OPEN_DOCUMENT, json!({ "node_id": "n1" }), &ctx).await.unwrap();
        assert!(outcome.success);

        let outcome = executor.execute(NAVIGATE, json!({}), &ctx).await.unwrap();
        assert!(matches!(outcome.into_result(NAVIGATE), Err(ToolError::Failed { .. })));

        assert!(matches!(executor.execute("launch", json!({}), &ctx).await, Err(ToolError::UnknownTool(_))));
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(executor.calls_to(OPEN_DOCUMENT)[0].user_id, "u1");
    }

    #[test]
    fn test_credentials_are_not_printed() {
        let mut ctx = ToolContext { user_id: "u1".to_string(), ..ToolContext::default() };
        ctx.credentials.insert("api_token".to_string(), "s3cret".to_string());
        let printed = format!("{ctx:?}");
        assert!(printed.contains("api_token"));
        assert!(!printed.contains("s3cret"));
    }
}
