//! Reviewer verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decode::{decode, Decode, DecodeStage, FieldScan};

/// Score given when a review could not be read.
pub const NEUTRAL_SCORE: f32 = 5.0;

/// Dimensions reviewers score.
pub const DIMENSIONS: [&str; 5] = ["clarity", "engagement", "grammar", "consistency", "creativity"];

/// A reviewer's structured verdict on one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// Computed approval: the reviewer did not object and the score meets the threshold.
    pub approved: bool,
    /// Overall score in [0, 10].
    pub score: f32,
    /// Overall feedback.
    #[serde(default)]
    pub feedback: String,
    /// Problems found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Suggested changes.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// What works.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Per-dimension scores.
    #[serde(default)]
    pub dimensions: BTreeMap<String, f32>,
}

impl Critique {
    /// Neutral verdict used when the reviewer's output is unusable.
    #[must_use]
    pub fn review_failed(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            score: NEUTRAL_SCORE,
            feedback: String::new(),
            issues: vec![format!("review failed: {}", reason.into())],
            suggestions: Vec::new(),
            strengths: Vec::new(),
            dimensions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CritiqueReply {
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default, alias = "scores")]
    dimensions: BTreeMap<String, f32>,
}

impl Decode for CritiqueReply {
    fn from_fields(fields: &FieldScan<'_>) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let score = fields.number("score")? as f32;
        #[allow(clippy::cast_possible_truncation)]
        let dimensions = DIMENSIONS
            .iter()
            .filter_map(|d| fields.number(d).map(|v| ((*d).to_string(), v as f32)))
            .collect();
        Some(Self {
            score: Some(score),
            approved: fields.boolean("approved"),
            feedback: fields.string("feedback").unwrap_or_default(),
            dimensions,
            ..Self::default()
        })
    }

    fn fallback(_raw: &str) -> Self {
        Self::default()
    }
}

/// Reads a reviewer reply and computes approval against `threshold`.
///
/// Never fails. A reply with no recoverable score becomes
/// [`Critique::review_failed`].
#[must_use]
pub fn parse_critique(raw: &str, threshold: f32) -> (Critique, DecodeStage) {
    let decoded = decode::<CritiqueReply>(raw);
    let reply = decoded.value;
    let Some(score) = reply.score.filter(|_| decoded.stage.is_parsed()) else {
        warn!(stage = %decoded.stage, "Review unreadable, using neutral critique");
        return (Critique::review_failed("reviewer output could not be parsed"), DecodeStage::Fallback);
    };

    let score = score.clamp(0.0, 10.0);
    let approved = reply.approved != Some(false) && score >= threshold;
    debug!(score, approved, stage = %decoded.stage, "Review parsed");
    let critique = Critique {
        approved,
        score,
        feedback: reply.feedback,
        issues: reply.issues,
        suggestions: reply.suggestions,
        strengths: reply.strengths,
        dimensions: reply.dimensions.into_iter().map(|(k, v)| (k.to_lowercase(), v.clamp(0.0, 10.0))).collect(),
    };
    (critique, decoded.stage)
}
