//! Intent to work-item expansion.
//!
//! Every resolved intent becomes a short list of typed [`Action`]s. Each
//! action kind carries only the fields its execution needs, and the
//! coordinator turns the executable ones into blackboard tasks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::documents::DocumentSnapshot;
use crate::intent::{Intent, IntentAnalysis, PipelineContext};

/// Document formats known to the structure generator, with their templates.
const FORMAT_TEMPLATES: &[(&str, &[&str])] = &[
    ("novel", &["three-act", "heros-journey", "save-the-cat", "seven-point"]),
    ("story", &["short-story", "flash-fiction", "three-act"]),
    ("book", &["non-fiction", "memoir", "how-to"]),
    ("screenplay", &["feature-film", "tv-pilot", "short-film"]),
    ("script", &["stage-play", "sketch", "short-film"]),
    ("podcast", &["interview", "narrative", "panel-discussion", "solo-episode"]),
    ("report", &["executive-summary", "research", "technical"]),
];

/// Format assumed when a structure request names none.
pub const DEFAULT_FORMAT: &str = "novel";

/// Templates offered for `format`. Empty for unknown formats.
#[must_use]
pub fn templates_for(format: &str) -> &'static [&'static str] {
    let format = format.to_lowercase();
    FORMAT_TEMPLATES.iter().find(|(name, _)| *name == format).map(|(_, templates)| *templates).unwrap_or_default()
}

/// Every known format name.
pub fn known_formats() -> impl Iterator<Item = &'static str> {
    FORMAT_TEMPLATES.iter().map(|(name, _)| *name)
}

/// Scheduling priority of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Runs first within a batch.
    High,
    /// Default.
    #[default]
    Normal,
    /// Best effort.
    Low,
}

/// Why content is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPurpose {
    /// Section text written into a document.
    Section,
    /// Reply to a question, shown in chat.
    Answer,
    /// Conversational reply, shown in chat.
    Chat,
}

/// Typed payload of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionKind {
    /// Write new text.
    GenerateContent {
        /// Enclosing document.
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<String>,
        /// Target section.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_id: Option<String>,
        /// Target section name.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_name: Option<String>,
        /// User request.
        prompt: String,
        /// Where the text goes.
        purpose: ContentPurpose,
    },
    /// Revise existing text.
    ImproveContent {
        /// Enclosing document.
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<String>,
        /// Target section.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_id: Option<String>,
        /// Target section name.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_name: Option<String>,
        /// User request.
        prompt: String,
        /// Keep the surrounding sections consistent.
        coherence: bool,
    },
    /// Create a new document structure.
    GenerateStructure {
        /// Document format.
        format: String,
        /// Chosen template.
        template: String,
        /// User request.
        prompt: String,
    },
    /// Add, move or remove sections.
    ModifyStructure {
        /// Document to change.
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<String>,
        /// User request.
        prompt: String,
    },
    /// Jump to a section of the open document.
    SelectSection {
        /// Target section.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_id: Option<String>,
        /// Target section name.
        #[serde(skip_serializing_if = "Option::is_none")]
        section_name: Option<String>,
    },
    /// Open a document from the canvas.
    OpenDocument {
        /// Canvas node.
        node_id: String,
        /// Node label.
        node_name: String,
    },
    /// Delete a canvas node. Always confirmed by the user first.
    DeleteNode {
        /// Canvas node, when identified.
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        /// Node label, when identified.
        #[serde(skip_serializing_if = "Option::is_none")]
        node_name: Option<String>,
    },
    /// Ask the user something before doing anything.
    RequestClarification {
        /// The question.
        question: String,
        /// Choices to offer.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
}

impl ActionKind {
    /// Capability a worker needs to take this action.
    #[must_use]
    pub const fn task_type(&self) -> &'static str {
        match self {
            Self::GenerateContent { .. } => "generate_content",
            Self::ImproveContent { .. } => "improve_content",
            Self::GenerateStructure { .. } => "generate_structure",
            Self::ModifyStructure { .. } => "modify_structure",
            Self::SelectSection { .. } => "select_section",
            Self::OpenDocument { .. } => "open_document",
            Self::DeleteNode { .. } => "delete_node",
            Self::RequestClarification { .. } => "request_clarification",
        }
    }

    /// Returns true for kinds that produce text with the writer.
    #[must_use]
    pub const fn is_writing(&self) -> bool {
        matches!(self, Self::GenerateContent { .. } | Self::ImproveContent { .. })
    }

    /// Section the action targets, if any.
    #[must_use]
    pub fn section_id(&self) -> Option<&str> {
        match self {
            Self::GenerateContent { section_id, .. }
            | Self::ImproveContent { section_id, .. }
            | Self::SelectSection { section_id, .. } => section_id.as_deref(),
            _ => None,
        }
    }
}

/// Condition that must hold before an action may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    /// The named document must exist in the document state.
    DocumentExists {
        /// Document id.
        document_id: String,
    },
    /// The section must exist in the named document.
    SectionExists {
        /// Enclosing document id.
        document_id: String,
        /// Section id.
        section_id: String,
    },
}

impl Precondition {
    /// Checks the condition against a document snapshot.
    #[must_use]
    pub fn is_satisfied(&self, snapshot: &DocumentSnapshot) -> bool {
        match self {
            Self::DocumentExists { document_id } => snapshot.document(document_id).is_some(),
            Self::SectionExists { document_id, section_id } => {
                snapshot.document(document_id).is_some_and(|doc| doc.section(section_id).is_some())
            }
        }
    }
}

/// One planned work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique id.
    pub id: String,
    /// What to do.
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Scheduling priority.
    pub priority: Priority,
    /// Must be confirmed or answered by the user; never executed automatically.
    pub requires_user_input: bool,
    /// Actions that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Must hold before the action runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl Action {
    /// Creates an action. Deletions and clarifications always wait for the user.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ActionKind, priority: Priority) -> Self {
        let requires_user_input =
            matches!(kind, ActionKind::DeleteNode { .. } | ActionKind::RequestClarification { .. });
        Self { id: id.into(), kind, priority, requires_user_input, depends_on: Vec::new(), precondition: None }
    }

    fn generated(kind: ActionKind, priority: Priority) -> Self {
        Self::new(format!("action-{}", Uuid::new_v4().simple()), kind, priority)
    }

    /// Adds a dependency.
    #[must_use]
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Sets the precondition.
    #[must_use]
    pub fn requiring(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    /// Returns true if the coordinator should execute this action.
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        !self.requires_user_input
    }
}

/// Turns a validated analysis into actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionPlanner;

impl ActionPlanner {
    /// Plans the actions for `analysis`.
    ///
    /// A clarification request short-circuits every other action.
    #[must_use]
    pub fn plan(analysis: &IntentAnalysis, ctx: &PipelineContext, snapshot: &DocumentSnapshot) -> Vec<Action> {
        if analysis.needs_clarification {
            let question = analysis
                .clarifying_question
                .clone()
                .unwrap_or_else(|| "Could you tell me a bit more about what you'd like to do?".to_string());
            return vec![Action::generated(
                ActionKind::RequestClarification { question, options: Vec::new() },
                Priority::High,
            )];
        }

        let prompt = ctx.message.clone();
        let document_id = snapshot.active_document().map(|d| d.id.clone());

        match analysis.intent {
            Intent::WriteContent => Self::content_actions(analysis, ctx, document_id, prompt, None),
            Intent::ImproveContent => Self::content_actions(analysis, ctx, document_id, prompt, Some(false)),
            Intent::RewriteWithCoherence => Self::content_actions(analysis, ctx, document_id, prompt, Some(true)),
            Intent::CreateStructure => {
                let format = analysis
                    .entities
                    .document_format
                    .clone()
                    .or_else(|| ctx.document_format.clone())
                    .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
                match analysis.entities.template.clone() {
                    Some(template) => vec![Action::generated(
                        ActionKind::GenerateStructure { format, template, prompt },
                        Priority::High,
                    )],
                    None => {
                        let options: Vec<String> = templates_for(&format).iter().map(|t| (*t).to_string()).collect();
                        vec![Action::generated(
                            ActionKind::RequestClarification {
                                question: format!("Which template should I use for your {format}?"),
                                options,
                            },
                            Priority::High,
                        )]
                    }
                }
            }
            Intent::ModifyStructure => vec![Action::generated(
                ActionKind::ModifyStructure { document_id, prompt },
                Priority::Normal,
            )],
            Intent::NavigateSection => vec![Action::generated(
                ActionKind::SelectSection {
                    section_id: analysis.entities.target_section.clone(),
                    section_name: analysis.entities.target_section_name.clone(),
                },
                Priority::High,
            )],
            Intent::OpenAndWrite => Self::open_and_write(analysis, prompt),
            Intent::DeleteNode => vec![Action::generated(
                ActionKind::DeleteNode {
                    node_id: analysis.entities.source_node.clone(),
                    node_name: analysis.entities.source_document.clone(),
                },
                Priority::Normal,
            )],
            Intent::AnswerQuestion => vec![Action::generated(
                ActionKind::GenerateContent {
                    document_id: None,
                    section_id: None,
                    section_name: None,
                    prompt,
                    purpose: ContentPurpose::Answer,
                },
                Priority::Normal,
            )],
            Intent::GeneralChat => vec![Action::generated(
                ActionKind::GenerateContent {
                    document_id: None,
                    section_id: None,
                    section_name: None,
                    prompt,
                    purpose: ContentPurpose::Chat,
                },
                Priority::Low,
            )],
            Intent::ClarificationNeeded => vec![Action::generated(
                ActionKind::RequestClarification {
                    question: "Could you tell me a bit more about what you'd like to do?".to_string(),
                    options: Vec::new(),
                },
                Priority::High,
            )],
        }
    }

    /// One action per named section, else one for the active segment.
    /// `improve` is `None` for fresh writing, else the coherence flag.
    fn content_actions(
        analysis: &IntentAnalysis,
        ctx: &PipelineContext,
        document_id: Option<String>,
        prompt: String,
        improve: Option<bool>,
    ) -> Vec<Action> {
        let mut targets: Vec<(Option<String>, Option<String>)> = analysis
            .entities
            .sections
            .iter()
            .map(|s| (Some(s.id.clone()), Some(s.name.clone())))
            .collect();
        if targets.is_empty() {
            let target = ctx.active_segment.as_ref().map_or_else(
                || (analysis.entities.target_section.clone(), analysis.entities.target_section_name.clone()),
                |seg| (Some(seg.id.clone()), Some(seg.name.clone())),
            );
            targets.push(target);
        }

        targets
            .into_iter()
            .map(|(section_id, section_name)| {
                let kind = match improve {
                    None => ActionKind::GenerateContent {
                        document_id: document_id.clone(),
                        section_id,
                        section_name,
                        prompt: prompt.clone(),
                        purpose: ContentPurpose::Section,
                    },
                    Some(coherence) => ActionKind::ImproveContent {
                        document_id: document_id.clone(),
                        section_id,
                        section_name,
                        prompt: prompt.clone(),
                        coherence,
                    },
                };
                let precondition = match (&document_id, kind.section_id()) {
                    (Some(document_id), Some(section_id)) => Some(Precondition::SectionExists {
                        document_id: document_id.clone(),
                        section_id: section_id.to_string(),
                    }),
                    (Some(document_id), None) => Some(Precondition::DocumentExists { document_id: document_id.clone() }),
                    (None, _) => None,
                };
                let action = Action::generated(kind, Priority::Normal);
                match precondition {
                    Some(precondition) => action.requiring(precondition),
                    None => action,
                }
            })
            .collect()
    }

    fn open_and_write(analysis: &IntentAnalysis, prompt: String) -> Vec<Action> {
        let Some(node_id) = analysis.entities.source_node.clone() else {
            return vec![Action::generated(
                ActionKind::RequestClarification {
                    question: "Which document on the canvas should I open?".to_string(),
                    options: Vec::new(),
                },
                Priority::High,
            )];
        };
        let node_name = analysis.entities.source_document.clone().unwrap_or_else(|| node_id.clone());

        let open = Action::generated(
            ActionKind::OpenDocument { node_id: node_id.clone(), node_name },
            Priority::High,
        );
        let write = Action::generated(
            ActionKind::GenerateContent {
                document_id: Some(node_id),
                section_id: analysis.entities.target_section.clone(),
                section_name: analysis.entities.target_section_name.clone(),
                prompt,
                purpose: ContentPurpose::Section,
            },
            Priority::Normal,
        )
        // The document only exists once the open step has run; the
        // dependency edge orders the two.
        .after(open.id.clone());
        vec![open, write]
    }
}
