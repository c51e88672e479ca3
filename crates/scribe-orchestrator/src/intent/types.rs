//! Types flowing through the intent pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of user intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Create a new document structure from scratch.
    CreateStructure,
    /// Add, remove or reorganise sections.
    ModifyStructure,
    /// Generate new content for a section.
    WriteContent,
    /// Refine existing content.
    ImproveContent,
    /// Rewrite while keeping sections consistent.
    RewriteWithCoherence,
    /// Jump to a section of the open document.
    NavigateSection,
    /// Open an existing canvas document and write in it.
    OpenAndWrite,
    /// Delete a canvas node.
    DeleteNode,
    /// Answer a question.
    AnswerQuestion,
    /// Conversation that fits nothing else.
    GeneralChat,
    /// The request cannot be acted on without asking.
    ClarificationNeeded,
}

impl Intent {
    /// Every intent.
    pub const ALL: [Self; 11] = [
        Self::CreateStructure,
        Self::ModifyStructure,
        Self::WriteContent,
        Self::ImproveContent,
        Self::RewriteWithCoherence,
        Self::NavigateSection,
        Self::OpenAndWrite,
        Self::DeleteNode,
        Self::AnswerQuestion,
        Self::GeneralChat,
        Self::ClarificationNeeded,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateStructure => "create_structure",
            Self::ModifyStructure => "modify_structure",
            Self::WriteContent => "write_content",
            Self::ImproveContent => "improve_content",
            Self::RewriteWithCoherence => "rewrite_with_coherence",
            Self::NavigateSection => "navigate_section",
            Self::OpenAndWrite => "open_and_write",
            Self::DeleteNode => "delete_node",
            Self::AnswerQuestion => "answer_question",
            Self::GeneralChat => "general_chat",
            Self::ClarificationNeeded => "clarification_needed",
        }
    }

    /// Content intents that operate on a selected section.
    #[must_use]
    pub const fn requires_selection(self) -> bool {
        matches!(self, Self::WriteContent | Self::ImproveContent | Self::RewriteWithCoherence)
    }

    /// Intents whose meaning depends on what already exists on the canvas.
    #[must_use]
    pub const fn is_canvas_sensitive(self) -> bool {
        matches!(self, Self::OpenAndWrite | Self::CreateStructure)
    }

    /// Model role that usually serves this intent.
    #[must_use]
    pub const fn default_model(self) -> SuggestedModel {
        match self {
            Self::WriteContent => SuggestedModel::Writer,
            Self::ImproveContent => SuggestedModel::Editor,
            _ => SuggestedModel::Orchestrator,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    /// Accepts the wire name in any case, with `-` or space for `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent: {s}"))
    }
}

/// Model role suggested for carrying out an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedModel {
    /// Planning and conversation.
    #[default]
    Orchestrator,
    /// Creative writing.
    Writer,
    /// Revision.
    Editor,
}

impl FromStr for SuggestedModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "orchestrator" => Ok(Self::Orchestrator),
            "writer" => Ok(Self::Writer),
            "editor" => Ok(Self::Editor),
            other => Err(format!("unknown model role: {other}")),
        }
    }
}

/// Shape of a request as judged by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// One clear intent.
    Simple,
    /// Several steps or conditions.
    Complex,
    /// More than one reading.
    Ambiguous,
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "complex" => Ok(Self::Complex),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Outcome of triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    /// Request shape.
    pub classification: Classification,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Resolved intent, if any.
    pub intent: Option<Intent>,
    /// The request needs multi-step reasoning.
    pub needs_reasoning: bool,
    /// The request needs more context than triage had.
    pub needs_more_context: bool,
    /// Why the smart pass was consulted.
    pub escalation_reason: Option<String>,
    /// The smart pass was consulted.
    pub was_escalated: bool,
    /// Short explanation.
    pub reasoning: String,
}

impl TriageResult {
    /// Conservative result used whenever triage output is unusable.
    #[must_use]
    pub fn safe_default(reasoning: impl Into<String>) -> Self {
        Self {
            classification: Classification::Complex,
            confidence: 0.5,
            intent: None,
            needs_reasoning: true,
            needs_more_context: true,
            escalation_reason: None,
            was_escalated: false,
            reasoning: reasoning.into(),
        }
    }
}

/// A section named in the request and found in the open document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRef {
    /// Section id.
    pub id: String,
    /// Section name.
    pub name: String,
}

/// Entities pulled out of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Target section id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_section: Option<String>,
    /// Target section name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_section_name: Option<String>,
    /// Every section named, in request order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<SectionRef>,
    /// Canvas node referenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node: Option<String>,
    /// Label of the referenced document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
    /// Template asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Document format asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_format: Option<String>,
}

impl ExtractedEntities {
    /// Fills every empty field from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.target_section, &other.target_section);
        fill(&mut self.target_section_name, &other.target_section_name);
        fill(&mut self.source_node, &other.source_node);
        fill(&mut self.source_document, &other.source_document);
        fill(&mut self.template, &other.template);
        fill(&mut self.document_format, &other.document_format);
        if self.sections.is_empty() {
            self.sections.clone_from(&other.sections);
        }
    }
}

/// Final resolved intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    /// Intent.
    pub intent: Intent,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Short explanation.
    pub reasoning: String,
    /// What the system should do.
    pub suggested_action: String,
    /// The action needs canvas or document context.
    pub requires_context: bool,
    /// Model role.
    pub suggested_model: SuggestedModel,
    /// The user must be asked before anything runs.
    pub needs_clarification: bool,
    /// Question to ask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,
    /// Entities.
    #[serde(default)]
    pub entities: ExtractedEntities,
    /// An LLM call contributed to the result.
    pub used_llm: bool,
}

impl IntentAnalysis {
    /// Creates an analysis with the intent's default role and no entities.
    #[must_use]
    pub fn new(intent: Intent, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            suggested_action: String::new(),
            requires_context: intent.requires_selection(),
            suggested_model: intent.default_model(),
            needs_clarification: false,
            clarifying_question: None,
            entities: ExtractedEntities::default(),
            used_llm: false,
        }
    }

    /// Marks the analysis as needing a user answer.
    pub fn ask(&mut self, question: impl Into<String>) {
        self.needs_clarification = true;
        if self.clarifying_question.is_none() {
            self.clarifying_question = Some(question.into());
        }
    }
}

/// Section the user has selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSegment {
    /// Section id.
    pub id: String,
    /// Section name.
    pub name: String,
    /// Nesting level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// The section already has text.
    #[serde(default)]
    pub has_content: bool,
}

impl ActiveSegment {
    /// Creates an empty top-level selection.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), level: None, has_content: false }
    }
}

/// A node visible on the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasNode {
    /// Node id.
    pub node_id: String,
    /// Node type ("novel", "podcast", ...).
    pub node_type: String,
    /// Label.
    pub label: String,
}

/// Canvas summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasContext {
    /// Nodes connected to the orchestrator.
    #[serde(default)]
    pub connected_nodes: Vec<CanvasNode>,
    /// Nodes on the canvas.
    #[serde(default)]
    pub total_nodes: usize,
}

impl CanvasContext {
    /// Returns true if nothing is on the canvas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_nodes == 0 && self.connected_nodes.is_empty()
    }
}

/// A previous turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// Author.
    pub role: String,
    /// Text.
    pub content: String,
}

/// An entry of the open document's outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureItem {
    /// Section id.
    pub id: String,
    /// Section name.
    pub name: String,
    /// Nesting level.
    pub level: u32,
    /// Parent section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// The section already has text.
    #[serde(default)]
    pub has_content: bool,
}

impl StructureItem {
    /// Creates a top-level item without content.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), level: 1, parent_id: None, has_content: false }
    }
}

/// Everything the pipeline knows about the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    /// The user's message.
    pub message: String,
    /// Selected section.
    #[serde(default)]
    pub active_segment: Option<ActiveSegment>,
    /// A document view is open.
    #[serde(default)]
    pub document_panel_open: bool,
    /// Format of the open document.
    #[serde(default)]
    pub document_format: Option<String>,
    /// Canvas summary.
    #[serde(default)]
    pub canvas: Option<CanvasContext>,
    /// Recent turns, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
    /// Outline of the open document.
    #[serde(default)]
    pub structure_items: Vec<StructureItem>,
}

impl PipelineContext {
    /// Context with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }

    /// Marks a document of `format` as open.
    #[must_use]
    pub fn with_panel_open(mut self, format: impl Into<String>) -> Self {
        self.document_panel_open = true;
        self.document_format = Some(format.into());
        self
    }

    /// Sets the selected section.
    #[must_use]
    pub fn with_active_segment(mut self, segment: ActiveSegment) -> Self {
        self.active_segment = Some(segment);
        self
    }

    /// Sets the canvas summary.
    #[must_use]
    pub fn with_canvas(mut self, canvas: CanvasContext) -> Self {
        self.canvas = Some(canvas);
        self
    }

    /// Sets the outline.
    #[must_use]
    pub fn with_structure(mut self, items: Vec<StructureItem>) -> Self {
        self.structure_items = items;
        self
    }

    /// Returns true if any canvas node is known.
    #[must_use]
    pub fn has_canvas_nodes(&self) -> bool {
        self.canvas.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parsing_is_lenient() {
        assert_eq!("write_content".parse::<Intent>().unwrap(), Intent::WriteContent);
        assert_eq!("Open-And-Write".parse::<Intent>().unwrap(), Intent::OpenAndWrite);
        assert_eq!(" navigate section ".parse::<Intent>().unwrap(), Intent::NavigateSection);
        assert!("summon_dragon".parse::<Intent>().is_err());
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
    }

    #[test]
    fn test_analysis_defaults_follow_intent() {
        let analysis = IntentAnalysis::new(Intent::ImproveContent, 1.4, "x");
        assert!((analysis.confidence - 1.0).abs() < f32::EPSILON);
        assert!(analysis.requires_context);
        assert_eq!(analysis.suggested_model, SuggestedModel::Editor);

        let question = IntentAnalysis::new(Intent::AnswerQuestion, 0.9, "x");
        assert!(!question.requires_context);
    }

    #[test]
    fn test_fill_from_keeps_existing_values() {
        let mut primary = ExtractedEntities { template: Some("interview".to_string()), ..Default::default() };
        let secondary = ExtractedEntities {
            template: Some("narrative".to_string()),
            document_format: Some("podcast".to_string()),
            ..Default::default()
        };
        primary.fill_from(&secondary);
        assert_eq!(primary.template.as_deref(), Some("interview"));
        assert_eq!(primary.document_format.as_deref(), Some("podcast"));
    }
}
