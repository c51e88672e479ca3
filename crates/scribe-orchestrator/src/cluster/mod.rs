//! Producer/reviewer refinement.
//!
//! A producer writes a draft, a reviewer scores it and the producer revises
//! against the feedback until the draft is approved or the revision budget is
//! spent. Best-of-N mode writes several drafts up front and keeps the best.

mod critique;
mod refinement;
mod roles;

pub use critique::{parse_critique, Critique, DIMENSIONS, NEUTRAL_SCORE};
pub use refinement::{IterationRecord, RefinementCluster, RefinementOutcome, RefinementSettings};
pub use roles::{Draft, DraftRequest, LlmCritic, LlmWriter, Producer, Review, Reviewer, Revision};
