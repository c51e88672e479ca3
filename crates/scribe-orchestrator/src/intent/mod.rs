//! Intent classification.
//!
//! A request flows through a regex pre-screen, fast triage with escalation,
//! context resolution, optional deep analysis and rule validation. The
//! result is a single validated [`IntentAnalysis`].

mod context;
mod deep;
mod patterns;
mod pipeline;
mod prompts;
mod triage;
mod types;
mod validation;

pub use context::{ContextResolver, ResolvedContext};
pub use deep::{fallback_analysis, DeepAnalyzer, FALLBACK_QUESTION};
pub use patterns::classify as classify_with_patterns;
pub use pipeline::{IntentPipeline, PipelineOutcome};
pub use triage::TriageStage;
pub use types::{
    ActiveSegment, CanvasContext, CanvasNode, Classification, ExtractedEntities, HistoryTurn, Intent, IntentAnalysis,
    PipelineContext, SectionRef, StructureItem, SuggestedModel, TriageResult,
};
pub use validation::{validate, Fix, ValidationReport, ValidationSettings, Verdict};

pub(crate) use prompts::truncate;
