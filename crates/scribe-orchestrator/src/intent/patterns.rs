//! Regex pre-screen for common request shapes.
//!
//! Runs before any model call. Rules are tried in a fixed priority order and
//! depend on the UI state (open document, active selection, canvas nodes).
//! A hit is a hint for triage, never a final answer.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::types::{Intent, IntentAnalysis, PipelineContext};

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("intent pattern should be valid")).collect()
}

static NAVIGATE: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)go to|jump to|navigate to|take me to|show me|find the"]));

static WRITE: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)\b(write|expand|continue|generate|create content|fill in|draft)\b"]));

static REWRITE_COHERENCE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(rewrite|update|change).*(coherent|consistent|flow|match)",
        r"(?i)make (it |this |them )?(all )?(coherent|consistent|flow)",
    ])
});

static IMPROVE: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)\b(improve|enhance|refine|polish|make (it )?better|fix)\b"]));

static DELETE: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)\b(delete|remove|discard|trash|get rid of)\b"]));

static QUESTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)^(what|who|where|when|why|how|can you|could you|tell me|explain)\b", r"\?$"])
});

static OPEN_AND_WRITE: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)(write|expand|continue).*(in|for|on) (the |my )?"]));

static CREATE_STRUCTURE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(create|start|begin|make|build|write)\b.*(novel|story|book|screenplay|script|podcast|report)",
        r"(?i)\b(novel|story|book|screenplay|script|podcast|report)\b.*(about|on|regarding)",
        r"(?i)^(a |the )?(new )?(novel|story|book|screenplay|script|podcast|report)",
    ])
});

static MODIFY_STRUCTURE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(add|insert|move|reorder|reorganize|restructure)",
        r"(?i)(new|another) (chapter|scene|act|section|part)",
    ])
});

static COMPLEX: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)(like|similar to|based on|inspired by)",
        r"(?i)(but|however|although|except)",
        r"(?i)(if|when|unless|until)",
    ])
});

fn any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

fn hit(intent: Intent, confidence: f32, reasoning: String, action: String) -> IntentAnalysis {
    let mut analysis = IntentAnalysis::new(intent, confidence, reasoning);
    analysis.suggested_action = action;
    analysis.requires_context = matches!(
        intent,
        Intent::WriteContent | Intent::RewriteWithCoherence | Intent::ImproveContent
    );
    analysis
}

/// Classifies `ctx.message` without a model. `None` means "needs a model".
#[must_use]
pub fn classify(ctx: &PipelineContext) -> Option<IntentAnalysis> {
    let message = ctx.message.trim();
    let result = classify_inner(message, ctx);
    match &result {
        Some(analysis) => debug!(intent = %analysis.intent, confidence = analysis.confidence, "Pattern hit"),
        None if any(&COMPLEX, message) => debug!("Complex phrasing, no pattern verdict"),
        None => debug!("No pattern matched"),
    }
    result
}

fn classify_inner(message: &str, ctx: &PipelineContext) -> Option<IntentAnalysis> {
    let format = ctx.document_format.as_deref().unwrap_or("document");

    if ctx.document_panel_open && any(&NAVIGATE, message) {
        return Some(hit(
            Intent::NavigateSection,
            0.95,
            format!("Navigation request within the open {format}"),
            format!("Find and select the requested section: \"{message}\""),
        ));
    }

    if let Some(segment) = &ctx.active_segment {
        let name = &segment.name;
        if any(&WRITE, message) {
            return Some(hit(
                Intent::WriteContent,
                0.95,
                format!("Explicit writing request for \"{name}\""),
                format!("Generate content for the selected section: \"{name}\""),
            ));
        }
        if any(&REWRITE_COHERENCE, message) {
            return Some(hit(
                Intent::RewriteWithCoherence,
                0.95,
                format!("Multi-section rewrite around \"{name}\""),
                "Rewrite the affected sections and keep them consistent".to_string(),
            ));
        }
        if any(&IMPROVE, message) {
            return Some(hit(
                Intent::ImproveContent,
                0.9,
                format!("Improvement request for \"{name}\""),
                format!("Refine the content in \"{name}\""),
            ));
        }
    }

    if any(&DELETE, message) {
        return Some(hit(
            Intent::DeleteNode,
            0.9,
            "Deletion request".to_string(),
            "Identify the node to delete and confirm with the user".to_string(),
        ));
    }

    if any(&QUESTION, message) {
        return Some(hit(
            Intent::AnswerQuestion,
            0.9,
            "Interrogative phrasing".to_string(),
            "Answer the question in chat".to_string(),
        ));
    }

    let nothing_open = !ctx.document_panel_open && ctx.active_segment.is_none();

    if nothing_open && ctx.has_canvas_nodes() && any(&OPEN_AND_WRITE, message) {
        return Some(hit(
            Intent::OpenAndWrite,
            0.95,
            "Writing request that refers to an existing canvas document".to_string(),
            "Open the referenced document and write in it".to_string(),
        ));
    }

    if nothing_open && any(&CREATE_STRUCTURE, message) {
        return Some(hit(
            Intent::CreateStructure,
            0.9,
            "New document request with the document panel closed".to_string(),
            "Generate a new document structure".to_string(),
        ));
    }

    if any(&MODIFY_STRUCTURE, message) {
        return Some(hit(
            Intent::ModifyStructure,
            0.85,
            "Structural change request".to_string(),
            "Update the document structure".to_string(),
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::types::{ActiveSegment, CanvasContext, CanvasNode};

    fn intent_of(ctx: &PipelineContext) -> Option<Intent> {
        classify(ctx).map(|a| a.intent)
    }

    fn canvas() -> CanvasContext {
        CanvasContext {
            connected_nodes: vec![CanvasNode {
                node_id: "n1".to_string(),
                node_type: "podcast".to_string(),
                label: "Our Podcast".to_string(),
            }],
            total_nodes: 1,
        }
    }

    #[test]
    fn test_navigation_needs_open_document() {
        let open = PipelineContext::new("Go to chapter 3").with_panel_open("novel");
        assert_eq!(intent_of(&open), Some(Intent::NavigateSection));
        assert!(!classify(&open).unwrap().used_llm);

        let closed = PipelineContext::new("Go to chapter 3");
        assert_ne!(intent_of(&closed), Some(Intent::NavigateSection));
    }

    #[test]
    fn test_selection_rules_in_priority_order() {
        let selected = |msg: &str| {
            PipelineContext::new(msg).with_panel_open("novel").with_active_segment(ActiveSegment::new("s1", "Intro"))
        };
        let write = classify(&selected("Expand this scene")).unwrap();
        assert_eq!(write.intent, Intent::WriteContent);
        assert!((write.confidence - 0.95).abs() < f32::EPSILON);
        assert!(write.requires_context);

        assert_eq!(intent_of(&selected("Make them all consistent")), Some(Intent::RewriteWithCoherence));
        assert_eq!(intent_of(&selected("Polish the dialogue")), Some(Intent::ImproveContent));
    }

    #[test]
    fn test_delete_and_question() {
        assert_eq!(intent_of(&PipelineContext::new("Remove the old draft")), Some(Intent::DeleteNode));
        assert_eq!(intent_of(&PipelineContext::new("What is a three-act structure")), Some(Intent::AnswerQuestion));
        assert_eq!(intent_of(&PipelineContext::new("Is this good?")), Some(Intent::AnswerQuestion));
    }

    #[test]
    fn test_open_and_write_requires_canvas() {
        let with_canvas = PipelineContext::new("Write the intro in our podcast").with_canvas(canvas());
        assert_eq!(intent_of(&with_canvas), Some(Intent::OpenAndWrite));

        let empty = PipelineContext::new("Write the intro in our podcast");
        assert_eq!(intent_of(&empty), Some(Intent::CreateStructure));
    }

    #[test]
    fn test_create_and_modify_structure() {
        let create = classify(&PipelineContext::new("Create a podcast")).unwrap();
        assert_eq!(create.intent, Intent::CreateStructure);
        assert!((create.confidence - 0.9).abs() < f32::EPSILON);

        let modify = PipelineContext::new("Add another chapter").with_panel_open("novel");
        assert_eq!(intent_of(&modify), Some(Intent::ModifyStructure));
    }

    #[test]
    fn test_unmatched_and_complex_return_none() {
        assert_eq!(intent_of(&PipelineContext::new("hmm")), None);
        let ctx = PipelineContext::new("Something similar to Dune").with_panel_open("novel");
        assert_eq!(intent_of(&ctx), None);
    }
}
