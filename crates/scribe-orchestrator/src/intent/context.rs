//! Context resolution: ties words in the request to things that exist.
//!
//! Deterministic; no model calls. Finds named sections of the open document,
//! the canvas node a request refers to, and any format or template names.

use regex::Regex;
use tracing::debug;

use super::types::{CanvasNode, ExtractedEntities, PipelineContext, SectionRef};
use crate::actions::{known_formats, templates_for};
use crate::decode::cached_regex;
use crate::documents::DocumentSnapshot;

/// What the resolver found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedContext {
    /// Entities grounded in the document and canvas state.
    pub entities: ExtractedEntities,
    /// Canvas node the request refers to.
    pub canvas_match: Option<CanvasNode>,
}

/// Resolves references in a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextResolver;

fn phrase(text: &str) -> Option<Regex> {
    cached_regex(&format!(r"(?i)\b{}\b", regex::escape(text.trim())))
}

fn position(message: &str, text: &str) -> Option<usize> {
    if text.trim().is_empty() {
        return None;
    }
    phrase(text)?.find(message).map(|m| m.start())
}

impl ContextResolver {
    /// Resolves `ctx` against `snapshot`.
    #[must_use]
    pub fn resolve(ctx: &PipelineContext, snapshot: &DocumentSnapshot) -> ResolvedContext {
        let message = ctx.message.as_str();
        let mut entities = ExtractedEntities::default();

        let sections = Self::named_sections(ctx, snapshot);
        if let [only] = sections.as_slice() {
            entities.target_section = Some(only.id.clone());
            entities.target_section_name = Some(only.name.clone());
        }
        entities.sections = if sections.len() > 1 { sections } else { Vec::new() };

        let canvas_match = Self::canvas_reference(ctx);
        if let Some(node) = &canvas_match {
            entities.source_node = Some(node.node_id.clone());
            entities.source_document = Some(node.label.clone());
        }

        entities.document_format = known_formats()
            .filter_map(|format| position(message, format).map(|pos| (pos, format)))
            .min()
            .map(|(_, format)| format.to_string());
        entities.template = Self::template(message, entities.document_format.as_deref());

        debug!(
            sections = entities.sections.len(),
            target = ?entities.target_section,
            canvas_node = ?entities.source_node,
            format = ?entities.document_format,
            template = ?entities.template,
            "Context resolved"
        );
        ResolvedContext { entities, canvas_match }
    }

    /// Sections named in the message, in the order they are mentioned.
    fn named_sections(ctx: &PipelineContext, snapshot: &DocumentSnapshot) -> Vec<SectionRef> {
        let outline: Vec<SectionRef> = if ctx.structure_items.is_empty() {
            snapshot
                .active_document()
                .map(|doc| doc.sections.iter().map(|s| SectionRef { id: s.id.clone(), name: s.name.clone() }).collect())
                .unwrap_or_default()
        } else {
            ctx.structure_items.iter().map(|s| SectionRef { id: s.id.clone(), name: s.name.clone() }).collect()
        };

        let mut found: Vec<(usize, SectionRef)> = outline
            .into_iter()
            .filter_map(|section| position(&ctx.message, &section.name).map(|pos| (pos, section)))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, section)| section).collect()
    }

    /// Canvas node named by label, else the only node of a named type.
    fn canvas_reference(ctx: &PipelineContext) -> Option<CanvasNode> {
        let canvas = ctx.canvas.as_ref()?;
        if let Some(node) = canvas.connected_nodes.iter().find(|n| position(&ctx.message, &n.label).is_some()) {
            return Some(node.clone());
        }

        let mut by_type = canvas.connected_nodes.iter().filter(|n| position(&ctx.message, &n.node_type).is_some());
        match (by_type.next(), by_type.next()) {
            (Some(node), None) => Some(node.clone()),
            _ => None,
        }
    }

    /// Template named in the message, preferring templates of `format`.
    fn template(message: &str, format: Option<&str>) -> Option<String> {
        let spaced = message.replace('-', " ");
        let mentioned = |template: &str| position(&spaced, &template.replace('-', " ")).is_some();

        if let Some(format) = format {
            if let Some(template) = templates_for(format).iter().copied().find(|t| mentioned(*t)) {
                return Some(template.to_string());
            }
        }
        known_formats()
            .flat_map(|f| templates_for(f).iter().copied())
            .find(|t| mentioned(*t))
            .map(ToString::to_string)
    }
}
