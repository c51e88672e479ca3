//! Prompt text for the model-backed pipeline stages.

use std::fmt::Write as _;

use super::types::{IntentAnalysis, PipelineContext, TriageResult};

const INTENT_CATALOGUE: &str = "\
STRUCTURE
- create_structure: create a new story or document from scratch
- modify_structure: add, remove or reorganise sections
CONTENT
- write_content: generate new content for a section
- improve_content: refine or polish existing content
- rewrite_with_coherence: update content while keeping sections consistent
NAVIGATION
- navigate_section: jump to a section of the open document
- open_and_write: open an existing canvas document and write in it
OTHER
- answer_question: a question, not a request for action
- delete_node: delete something from the canvas
- general_chat: conversation that fits nothing else";

const HISTORY_TURNS: usize = 3;
const HISTORY_CHARS: usize = 100;
const CANVAS_LABELS: usize = 3;

pub(crate) const TRIAGE_SYSTEM: &str = "\
You triage requests for a creative writing assistant. Decide quickly how hard the request is to \
understand and which intent it most likely has.

Respond with ONLY a JSON object:
{\"classification\": \"simple\" | \"complex\" | \"ambiguous\", \"confidence\": 0.0-1.0, \
\"intent\": <intent name or null>, \"needs_reasoning\": bool, \"needs_more_context\": bool, \
\"reasoning\": \"one sentence\"}";

pub(crate) const ESCALATION_SYSTEM: &str = "\
You are the second opinion for a creative writing assistant's request triage. A fast first pass was \
not confident enough. Reason about the request and the UI state, then give your own verdict. Only \
report a confidence you can justify.

Respond with ONLY a JSON object:
{\"classification\": \"simple\" | \"complex\" | \"ambiguous\", \"confidence\": 0.0-1.0, \
\"intent\": <intent name or null>, \"needs_reasoning\": bool, \"needs_more_context\": bool, \
\"reasoning\": \"one or two sentences\"}";

/// Character-safe prefix.
pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Short UI-state summary shared by every stage.
pub(crate) fn ui_state(ctx: &PipelineContext) -> String {
    let mut out = String::new();
    if ctx.document_panel_open {
        let _ = writeln!(out, "- Document panel is OPEN (format: {})", ctx.document_format.as_deref().unwrap_or("unknown"));
        if let Some(segment) = &ctx.active_segment {
            let _ = writeln!(out, "- Active section: \"{}\" (level {})", segment.name, segment.level.unwrap_or(1));
        }
    } else {
        out.push_str("- Document panel is CLOSED (user is on canvas view)\n");
    }
    out
}

/// Full context block for deep analysis.
pub(crate) fn context_section(ctx: &PipelineContext) -> String {
    let mut out = ui_state(ctx);

    if let Some(canvas) = ctx.canvas.as_ref().filter(|c| c.total_nodes > 0) {
        let _ = writeln!(out, "- Canvas has {} nodes", canvas.total_nodes);
        if !canvas.connected_nodes.is_empty() {
            let labels: Vec<&str> =
                canvas.connected_nodes.iter().take(CANVAS_LABELS).map(|n| n.label.as_str()).collect();
            let _ = writeln!(out, "- Connected documents: {}", labels.join(", "));
        }
    }

    if !ctx.structure_items.is_empty() {
        let names: Vec<&str> = ctx.structure_items.iter().map(|s| s.name.as_str()).collect();
        let _ = writeln!(out, "- Document outline: {}", names.join(", "));
    }

    if !ctx.conversation_history.is_empty() {
        out.push_str("- Recent conversation:\n");
        let skip = ctx.conversation_history.len().saturating_sub(HISTORY_TURNS);
        for turn in &ctx.conversation_history[skip..] {
            let _ = writeln!(out, "  [{}]: {}...", turn.role, truncate(&turn.content, HISTORY_CHARS));
        }
    }

    out.trim_end().to_string()
}

pub(crate) fn triage_user(ctx: &PipelineContext, hint: Option<&IntentAnalysis>) -> String {
    let mut out = format!("Request: \"{}\"\n\nUI state:\n{}\nIntents:\n{INTENT_CATALOGUE}\n", ctx.message, ui_state(ctx));
    if let Some(hint) = hint {
        let _ = write!(
            out,
            "\nA keyword pre-screen suggests `{}` (confidence {:.2}). Treat it as a hint only.\n",
            hint.intent, hint.confidence
        );
    }
    out
}

pub(crate) fn escalation_user(ctx: &PipelineContext, fast: &TriageResult, reason: &str, prior_reply: &str) -> String {
    format!(
        "Request: \"{}\"\n\nUI state:\n{}\nIntents:\n{INTENT_CATALOGUE}\n\n\
         First pass verdict ({reason}):\n{prior_reply}\n\n\
         First pass summary: classification {:?}, intent {}, confidence {:.2}.",
        ctx.message,
        ui_state(ctx),
        fast.classification,
        fast.intent.map_or("none", |i| i.as_str()),
        fast.confidence,
    )
}

pub(crate) fn deep_system(ctx: &PipelineContext, triage: &TriageResult) -> String {
    let prior = match triage.intent {
        Some(intent) => format!("Triage leaned towards `{intent}` at confidence {:.2}.", triage.confidence),
        None => "Triage could not settle on an intent.".to_string(),
    };
    format!(
        "You are an intent analyzer for a creative writing platform.\n\n\
         Possible intents:\n{INTENT_CATALOGUE}\n\n\
         CONTEXT INFORMATION:\n{}\n\n{prior}\n\n\
         IMPORTANT:\n\
         - Return ONLY valid JSON\n\
         - Be concise in reasoning (1-2 sentences)\n\
         - Confidence should reflect certainty (0.5 = unsure, 0.9+ = very confident)\n\
         - \"create a podcast\" with no podcast on the canvas is create_structure; \"write in our podcast\" \
           with a matching canvas node is open_and_write\n\
         - If truly ambiguous, set needs_clarification=true and provide a clarifying_question",
        context_section(ctx)
    )
}

pub(crate) fn deep_user(message: &str) -> String {
    format!(
        "Analyze this user message and determine the intent:\n\n\"{message}\"\n\n\
         Return your analysis as JSON with these fields:\n\
         - intent: string (one of the intents listed above)\n\
         - confidence: number (0.0 to 1.0)\n\
         - reasoning: string\n\
         - suggested_action: string\n\
         - requires_context: boolean\n\
         - suggested_model: \"orchestrator\", \"writer\" or \"editor\"\n\
         - needs_clarification: boolean\n\
         - clarifying_question: string or null\n\
         - extracted_entities: object (template, document_format, target_section, source_document)\n\n\
         JSON response:"
    )
}
