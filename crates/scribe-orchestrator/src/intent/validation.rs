//! Rule-based validation of a resolved intent.
//!
//! Every rule is independent and every rule runs. Rules see the analysis as
//! left by the rules before them, so an auto-correction made early is what
//! later rules check. Corrections are applied in place and reported as
//! warnings; violations that cannot be corrected turn into a clarifying
//! question.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{Intent, IntentAnalysis, PipelineContext};
use crate::actions::{known_formats, templates_for};

static CHAPTER_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bchapters?\b").expect("chapter pattern should be valid"));

static SCENE_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(scenes?|acts?|episodes?)\b").expect("scene pattern should be valid"));

/// A change a rule makes to the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "fix", content = "value", rename_all = "snake_case")]
pub enum Fix {
    /// Replace the intent.
    ChangeIntent(Intent),
    /// The intent does not need selection context.
    ClearRequiresContext,
    /// Drop the suggested template.
    ClearTemplate,
}

impl Fix {
    fn apply(self, analysis: &mut IntentAnalysis) {
        match self {
            Self::ChangeIntent(intent) => {
                analysis.intent = intent;
                analysis.suggested_model = intent.default_model();
            }
            Self::ClearRequiresContext => analysis.requires_context = false,
            Self::ClearTemplate => analysis.entities.template = None,
        }
    }
}

/// What one rule concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to report.
    Valid,
    /// Allowed, but worth telling the user.
    Warn(String),
    /// Wrong, and fixable without asking.
    AutoCorrect {
        /// What was wrong.
        message: String,
        /// How it is fixed.
        fix: Fix,
    },
    /// Wrong, and only the user can settle it.
    Reject(String),
}

type Rule = fn(&IntentAnalysis, &PipelineContext, &ValidationSettings) -> Verdict;

/// Knobs used by the rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSettings {
    /// Analyses below this confidence are rejected.
    pub min_confidence: f32,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self { min_confidence: 0.5 }
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// The analysis after every correction.
    pub analysis: IntentAnalysis,
    /// Corrections applied, in rule order.
    pub corrections: Vec<Fix>,
    /// Correction messages and soft warnings.
    pub warnings: Vec<String>,
    /// Violations that need the user.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Returns true if no rule rejected the analysis.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn format_of<'a>(analysis: &'a IntentAnalysis, ctx: &'a PipelineContext) -> Option<&'a str> {
    if ctx.document_panel_open {
        ctx.document_format.as_deref().or(analysis.entities.document_format.as_deref())
    } else {
        analysis.entities.document_format.as_deref().or(ctx.document_format.as_deref())
    }
}

fn no_structure_over_open_document(analysis: &IntentAnalysis, ctx: &PipelineContext, _: &ValidationSettings) -> Verdict {
    if analysis.intent == Intent::CreateStructure && ctx.document_panel_open {
        Verdict::AutoCorrect {
            message: "A document is already open; writing into it instead of creating a new structure".to_string(),
            fix: Fix::ChangeIntent(Intent::WriteContent),
        }
    } else {
        Verdict::Valid
    }
}

fn selection_required(analysis: &IntentAnalysis, ctx: &PipelineContext, _: &ValidationSettings) -> Verdict {
    if analysis.intent.requires_selection() && ctx.active_segment.is_none() && !ctx.document_panel_open {
        Verdict::Reject(format!(
            "Which section should I work on? Open a document and select a section first ({} needs one).",
            analysis.intent
        ))
    } else {
        Verdict::Valid
    }
}

fn terminology_matches_format(analysis: &IntentAnalysis, ctx: &PipelineContext, _: &ValidationSettings) -> Verdict {
    let Some(format) = format_of(analysis, ctx).map(str::to_lowercase) else {
        return Verdict::Valid;
    };
    let units = match format.as_str() {
        "screenplay" | "script" => "scenes and acts",
        "podcast" => "episodes and segments",
        "novel" | "story" | "book" => {
            return match SCENE_WORDS.find(&ctx.message) {
                Some(word) => Verdict::Warn(format!(
                    "A {format} is organised in chapters; reading \"{}\" as a chapter-level section",
                    word.as_str()
                )),
                None => Verdict::Valid,
            };
        }
        _ => return Verdict::Valid,
    };
    if CHAPTER_WORDS.is_match(&ctx.message) {
        Verdict::Reject(format!(
            "This {format} is organised in {units}, not chapters. Which part did you mean?"
        ))
    } else {
        Verdict::Valid
    }
}

fn confidence_floor(analysis: &IntentAnalysis, _: &PipelineContext, settings: &ValidationSettings) -> Verdict {
    if analysis.confidence < settings.min_confidence {
        Verdict::Reject(format!(
            "I'm only {:.0}% sure what you mean. Could you rephrase your request?",
            analysis.confidence * 100.0
        ))
    } else {
        Verdict::Valid
    }
}

fn template_fits_format(analysis: &IntentAnalysis, ctx: &PipelineContext, _: &ValidationSettings) -> Verdict {
    let (Some(template), Some(format)) = (analysis.entities.template.as_deref(), format_of(analysis, ctx)) else {
        return Verdict::Valid;
    };
    let format = format.to_lowercase();
    if !known_formats().any(|f| f == format) || templates_for(&format).contains(&template) {
        return Verdict::Valid;
    }
    Verdict::AutoCorrect {
        message: format!("Template \"{template}\" does not belong to {format}; dropping it"),
        fix: Fix::ClearTemplate,
    }
}

fn navigation_needs_open_document(analysis: &IntentAnalysis, ctx: &PipelineContext, _: &ValidationSettings) -> Verdict {
    if analysis.intent == Intent::NavigateSection && !ctx.document_panel_open {
        Verdict::AutoCorrect {
            message: "No document is open to navigate; opening one first".to_string(),
            fix: Fix::ChangeIntent(Intent::OpenAndWrite),
        }
    } else {
        Verdict::Valid
    }
}

fn questions_need_no_selection(analysis: &IntentAnalysis, _: &PipelineContext, _: &ValidationSettings) -> Verdict {
    if analysis.intent == Intent::AnswerQuestion && analysis.requires_context {
        Verdict::AutoCorrect {
            message: "Questions are answered without selection context".to_string(),
            fix: Fix::ClearRequiresContext,
        }
    } else {
        Verdict::Valid
    }
}

const RULES: &[(&str, Rule)] = &[
    ("no_structure_over_open_document", no_structure_over_open_document),
    ("selection_required", selection_required),
    ("terminology_matches_format", terminology_matches_format),
    ("confidence_floor", confidence_floor),
    ("template_fits_format", template_fits_format),
    ("navigation_needs_open_document", navigation_needs_open_document),
    ("questions_need_no_selection", questions_need_no_selection),
];

/// Runs every rule over `analysis`.
#[must_use]
pub fn validate(mut analysis: IntentAnalysis, ctx: &PipelineContext, settings: &ValidationSettings) -> ValidationReport {
    let mut corrections = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for (name, rule) in RULES {
        match rule(&analysis, ctx, settings) {
            Verdict::Valid => debug!(rule = *name, "Rule passed"),
            Verdict::Warn(message) => {
                warn!(rule = *name, message = %message, "Validation warning");
                warnings.push(message);
            }
            Verdict::AutoCorrect { message, fix } => {
                warn!(rule = *name, fix = ?fix, message = %message, "Auto-corrected intent");
                fix.apply(&mut analysis);
                corrections.push(fix);
                warnings.push(message);
            }
            Verdict::Reject(message) => {
                warn!(rule = *name, message = %message, "Validation failed");
                errors.push(message);
            }
        }
    }

    if !errors.is_empty() {
        analysis.ask(errors.join(" "));
    }
    ValidationReport { analysis, corrections, warnings, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::types::ActiveSegment;

    fn run(analysis: IntentAnalysis, ctx: &PipelineContext) -> ValidationReport {
        validate(analysis, ctx, &ValidationSettings::default())
    }

    #[test]
    fn test_question_never_requires_context() {
        let mut analysis = IntentAnalysis::new(Intent::AnswerQuestion, 0.9, "q");
        analysis.requires_context = true;
        let report = run(analysis, &PipelineContext::new("What is pacing?"));

        assert!(!report.analysis.requires_context);
        assert_eq!(report.corrections, vec![Fix::ClearRequiresContext]);
        assert!(report.is_valid());
    }

    #[test]
    fn test_create_over_open_document_becomes_write() {
        let ctx = PipelineContext::new("Create a story about foxes").with_panel_open("novel");
        let report = run(IntentAnalysis::new(Intent::CreateStructure, 0.9, "x"), &ctx);
        assert_eq!(report.analysis.intent, Intent::WriteContent);
        assert!(report.is_valid());
    }

    #[test]
    fn test_selection_required_when_nothing_open() {
        let report = run(IntentAnalysis::new(Intent::ImproveContent, 0.9, "x"), &PipelineContext::new("polish it"));
        assert!(!report.is_valid());
        assert!(report.analysis.needs_clarification);
        assert!(report.analysis.clarifying_question.unwrap().starts_with("Which section"));

        let selected = PipelineContext::new("polish it").with_active_segment(ActiveSegment::new("s1", "Intro"));
        assert!(run(IntentAnalysis::new(Intent::ImproveContent, 0.9, "x"), &selected).is_valid());
    }

    #[test]
    fn test_terminology_hard_and_soft() {
        let screenplay = PipelineContext::new("Write chapter 2").with_panel_open("screenplay");
        let report = run(IntentAnalysis::new(Intent::WriteContent, 0.9, "x"), &screenplay);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("scenes and acts"));

        let novel = PipelineContext::new("Write the next scene").with_panel_open("novel");
        let report = run(IntentAnalysis::new(Intent::WriteContent, 0.9, "x"), &novel);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let report = run(IntentAnalysis::new(Intent::GeneralChat, 0.3, "x"), &PipelineContext::new("hm"));
        assert_eq!(report.errors.len(), 1);
        assert!(report.analysis.needs_clarification);
    }

    #[test]
    fn test_template_must_belong_to_format() {
        let mut analysis = IntentAnalysis::new(Intent::CreateStructure, 0.9, "x");
        analysis.entities.document_format = Some("podcast".to_string());
        analysis.entities.template = Some("three-act".to_string());
        let report = run(analysis, &PipelineContext::new("Create a podcast, three act"));
        assert!(report.analysis.entities.template.is_none());
        assert_eq!(report.corrections, vec![Fix::ClearTemplate]);

        let mut analysis = IntentAnalysis::new(Intent::CreateStructure, 0.9, "x");
        analysis.entities.document_format = Some("podcast".to_string());
        analysis.entities.template = Some("interview".to_string());
        let report = run(analysis, &PipelineContext::new("Create an interview podcast"));
        assert_eq!(report.analysis.entities.template.as_deref(), Some("interview"));
    }

    #[test]
    fn test_navigation_without_document_opens_one() {
        let report = run(IntentAnalysis::new(Intent::NavigateSection, 0.9, "x"), &PipelineContext::new("go to the end"));
        assert_eq!(report.analysis.intent, Intent::OpenAndWrite);
    }

    #[test]
    fn test_rules_do_not_short_circuit() {
        // Low confidence and a question that claims context: one error, one correction.
        let mut analysis = IntentAnalysis::new(Intent::AnswerQuestion, 0.2, "x");
        analysis.requires_context = true;
        let report = run(analysis, &PipelineContext::new("why?"));

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.corrections, vec![Fix::ClearRequiresContext]);
        assert!(!report.analysis.requires_context);
        assert!(report.analysis.needs_clarification);
    }
}
