//! Producer/reviewer refinement loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use scribe_abstraction::ModelError;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::critique::Critique;
use super::roles::{Draft, DraftRequest, Producer, Review, Reviewer, Revision};
use crate::config::RefinementConfig;
use crate::events::{TraceEvent, TraceReporter};

/// Loop limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementSettings {
    /// Revisions allowed after the initial draft.
    pub max_iterations: u32,
    /// Minimum score for approval.
    pub quality_threshold: f32,
    /// Drafts generated in best-of-N mode.
    pub best_of_n: usize,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self::from(&RefinementConfig::default())
    }
}

impl From<&RefinementConfig> for RefinementSettings {
    fn from(config: &RefinementConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            quality_threshold: config.quality_threshold,
            best_of_n: config.best_of_n,
        }
    }
}

/// One reviewed draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// Review number, starting at 1.
    pub iteration: u32,
    /// Score given.
    pub score: f32,
    /// Whether it was approved.
    pub approved: bool,
    /// Reviewer feedback.
    pub feedback: String,
    /// Draft length in characters.
    pub chars: usize,
}

/// Result of a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementOutcome {
    /// Final artifact.
    pub content: String,
    /// Score of the returned artifact. After an unapproved run this is the
    /// best score seen, not the score of the last revision.
    pub score: f32,
    /// Whether it was approved.
    pub approved: bool,
    /// Reviews performed.
    pub iterations: u32,
    /// Producer calls made.
    pub producer_calls: u32,
    /// Reviewer calls made.
    pub reviewer_calls: u32,
    /// Wall time spent producing, in milliseconds.
    pub producer_ms: u64,
    /// Wall time spent reviewing, in milliseconds.
    pub reviewer_ms: u64,
    /// Tokens spent by both roles.
    pub tokens: u64,
    /// Verdict on the returned artifact.
    pub critique: Critique,
    /// Every review in order.
    pub history: Vec<IterationRecord>,
}

#[derive(Debug, Clone)]
struct Candidate {
    content: String,
    critique: Critique,
}

#[derive(Debug, Default)]
struct Tally {
    producer_calls: u32,
    reviewer_calls: u32,
    producer_time: Duration,
    reviewer_time: Duration,
    tokens: u64,
    history: Vec<IterationRecord>,
    best: Option<Candidate>,
}

impl Tally {
    fn produced(&mut self, calls: u32, elapsed: Duration, drafts: &[&Draft]) {
        self.producer_calls += calls;
        self.producer_time += elapsed;
        self.tokens += drafts.iter().map(|d| d.tokens).sum::<u64>();
    }

    /// Records a review and keeps the best candidate; ties go to the later draft.
    fn reviewed(&mut self, content: &str, review: &Review) -> Candidate {
        self.reviewer_calls += 1;
        self.tokens += review.tokens;
        let iteration = u32::try_from(self.history.len() + 1).unwrap_or(u32::MAX);
        self.history.push(IterationRecord {
            iteration,
            score: review.critique.score,
            approved: review.critique.approved,
            feedback: review.critique.feedback.clone(),
            chars: content.chars().count(),
        });

        let candidate = Candidate { content: content.to_string(), critique: review.critique.clone() };
        if self.best.as_ref().is_none_or(|best| candidate.critique.score >= best.critique.score) {
            self.best = Some(candidate.clone());
        }
        candidate
    }

    fn finish(self, current: Candidate) -> RefinementOutcome {
        let chosen = if current.critique.approved { current } else { self.best.unwrap_or(current) };
        RefinementOutcome {
            score: chosen.critique.score,
            approved: chosen.critique.approved,
            content: chosen.content,
            critique: chosen.critique,
            iterations: self.reviewer_calls,
            producer_calls: self.producer_calls,
            reviewer_calls: self.reviewer_calls,
            producer_ms: u64::try_from(self.producer_time.as_millis()).unwrap_or(u64::MAX),
            reviewer_ms: u64::try_from(self.reviewer_time.as_millis()).unwrap_or(u64::MAX),
            tokens: self.tokens,
            history: self.history,
        }
    }
}

/// Pairs a producer with a reviewer and iterates until approval or the
/// revision budget runs out.
pub struct RefinementCluster {
    producer: Arc<dyn Producer>,
    reviewer: Arc<dyn Reviewer>,
    settings: RefinementSettings,
    reporter: Option<Arc<TraceReporter>>,
}

impl std::fmt::Debug for RefinementCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementCluster").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl RefinementCluster {
    /// Creates a cluster.
    #[must_use]
    pub fn new(producer: Arc<dyn Producer>, reviewer: Arc<dyn Reviewer>, settings: RefinementSettings) -> Self {
        Self { producer, reviewer, settings, reporter: None }
    }

    /// Publishes one event per review.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<TraceReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> RefinementSettings {
        self.settings
    }

    /// Returns a copy with different limits.
    #[must_use]
    pub fn with_settings(&self, settings: RefinementSettings) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            reviewer: Arc::clone(&self.reviewer),
            settings,
            reporter: self.reporter.clone(),
        }
    }

    /// Drafts, reviews and revises until approved or out of revisions.
    ///
    /// When no draft is approved the highest-scoring one is returned with
    /// `approved == false`. A failed revision ends the loop early and keeps
    /// the best draft so far.
    ///
    /// # Errors
    /// Returns the producer's error if the initial draft cannot be written.
    pub async fn refine(&self, request: &DraftRequest) -> Result<RefinementOutcome, ModelError> {
        let mut tally = Tally::default();

        let started = Instant::now();
        let draft = self.producer.produce(request, None).await;
        let draft = draft.inspect_err(|err| warn!(task_id = %request.task_id, error = %err, "Initial draft failed"))?;
        tally.produced(1, started.elapsed(), &[&draft]);

        let (review, elapsed) = self.review(request, &draft.content).await;
        let current = self.record(&mut tally, request, &draft.content, &review, elapsed);
        Ok(self.revise(tally, request, current).await)
    }

    /// Generates N drafts concurrently, reviews them all and keeps the best.
    ///
    /// If the best draft is not approved it seeds the ordinary revision loop.
    ///
    /// # Errors
    /// Returns a producer error if every draft fails.
    pub async fn best_of_n(&self, request: &DraftRequest) -> Result<RefinementOutcome, ModelError> {
        let n = self.settings.best_of_n.max(1);
        let mut tally = Tally::default();

        let started = Instant::now();
        let results = join_all((0..n).map(|_| self.producer.produce(request, None))).await;
        let mut drafts = Vec::with_capacity(n);
        let mut last_error = None;
        for result in results {
            match result {
                Ok(draft) => drafts.push(draft),
                Err(err) => {
                    warn!(task_id = %request.task_id, error = %err, "Best-of-N draft failed");
                    last_error = Some(err);
                }
            }
        }
        tally.produced(u32::try_from(n).unwrap_or(u32::MAX), started.elapsed(), &drafts.iter().collect::<Vec<_>>());
        if drafts.is_empty() {
            return Err(last_error.unwrap_or_else(|| ModelError::Other("no drafts produced".to_string())));
        }

        let started = Instant::now();
        let reviews =
            join_all(drafts.iter().map(|d| self.reviewer.review(request, &d.content, self.settings.quality_threshold)))
                .await;
        tally.reviewer_time += started.elapsed();

        for (draft, review) in drafts.iter().zip(&reviews) {
            self.record(&mut tally, request, &draft.content, review, Duration::ZERO);
        }
        let Some(seed) = tally.best.clone() else {
            return Err(ModelError::Other("no drafts reviewed".to_string()));
        };

        info!(task_id = %request.task_id, drafts = drafts.len(), best_score = seed.critique.score, "Best-of-N reviewed");
        Ok(self.revise(tally, request, seed).await)
    }

    async fn review(&self, request: &DraftRequest, content: &str) -> (Review, Duration) {
        let started = Instant::now();
        let review = self.reviewer.review(request, content, self.settings.quality_threshold).await;
        (review, started.elapsed())
    }

    fn record(
        &self,
        tally: &mut Tally,
        request: &DraftRequest,
        content: &str,
        review: &Review,
        elapsed: Duration,
    ) -> Candidate {
        tally.reviewer_time += elapsed;
        let candidate = tally.reviewed(content, review);
        let iteration = tally.reviewer_calls;
        debug!(
            task_id = %request.task_id,
            iteration,
            score = review.critique.score,
            approved = review.critique.approved,
            "Draft reviewed"
        );
        if let Some(reporter) = &self.reporter {
            reporter.emit(TraceEvent::RefinementIteration {
                task_id: request.task_id.clone(),
                iteration,
                score: review.critique.score,
                approved: review.critique.approved,
            });
        }
        candidate
    }

    async fn revise(&self, mut tally: Tally, request: &DraftRequest, mut current: Candidate) -> RefinementOutcome {
        let mut revisions = 0;
        while !current.critique.approved && revisions < self.settings.max_iterations {
            let started = Instant::now();
            let revision = Revision { draft: &current.content, critique: &current.critique };
            let draft = match self.producer.produce(request, Some(revision)).await {
                Ok(draft) => draft,
                Err(err) => {
                    tally.produced(1, started.elapsed(), &[]);
                    warn!(task_id = %request.task_id, error = %err, "Revision failed, keeping best draft");
                    break;
                }
            };
            tally.produced(1, started.elapsed(), &[&draft]);
            revisions += 1;

            let (review, elapsed) = self.review(request, &draft.content).await;
            current = self.record(&mut tally, request, &draft.content, &review, elapsed);
        }

        let outcome = tally.finish(current);
        info!(
            task_id = %request.task_id,
            iterations = outcome.iterations,
            score = outcome.score,
            approved = outcome.approved,
            "Refinement finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::critique::parse_critique;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes "draft-N" and optionally fails on one call.
    #[derive(Default)]
    struct NumberedProducer {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Producer for NumberedProducer {
        async fn produce(&self, _request: &DraftRequest, _revision: Option<Revision<'_>>) -> Result<Draft, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(ModelError::Other("producer down".to_string()));
            }
            Ok(Draft { content: format!("draft-{n}"), tokens: 10 })
        }
    }

    /// Scores a draft by its number.
    struct ScoreTable {
        calls: AtomicUsize,
        scores: Vec<f32>,
    }

    impl ScoreTable {
        fn new(scores: &[f32]) -> Self {
            Self { calls: AtomicUsize::new(0), scores: scores.to_vec() }
        }
    }

    #[async_trait]
    impl Reviewer for ScoreTable {
        async fn review(&self, _request: &DraftRequest, draft: &str, threshold: f32) -> Review {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: usize = draft.trim_start_matches("draft-").parse().unwrap();
            let score = self.scores[n - 1];
            Review { critique: parse_critique(&format!(r#"{{"score": {score}}}"#), threshold).0, tokens: 5 }
        }
    }

    fn pair(producer: NumberedProducer, reviewer: ScoreTable) -> (RefinementCluster, Arc<NumberedProducer>, Arc<ScoreTable>) {
        let producer = Arc::new(producer);
        let reviewer = Arc::new(reviewer);
        let cluster = RefinementCluster::new(producer.clone(), reviewer.clone(), RefinementSettings::default());
        (cluster, producer, reviewer)
    }

    fn request() -> DraftRequest {
        DraftRequest::new("task-1", "Write chapter 1")
    }

    #[tokio::test]
    async fn test_first_draft_approved() {
        let (cluster, producer, reviewer) = pair(NumberedProducer::default(), ScoreTable::new(&[8.0]));
        let outcome = cluster.refine(&request()).await.unwrap();

        assert!(outcome.approved);
        assert_eq!(outcome.content, "draft-1");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.tokens, 15);
    }

    #[tokio::test]
    async fn test_exhausted_loop_returns_best_draft() {
        let (cluster, producer, _) = pair(NumberedProducer::default(), ScoreTable::new(&[4.0, 6.0, 5.0, 6.0]));
        let outcome = cluster.refine(&request()).await.unwrap();

        assert!(!outcome.approved);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.reviewer_calls, 4);
        // Ties go to the later draft.
        assert_eq!(outcome.content, "draft-4");
        assert!((outcome.score - 6.0).abs() < f32::EPSILON);
        assert_eq!(outcome.history.len(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_loop_reports_best_score_not_last() {
        let (cluster, _, _) = pair(NumberedProducer::default(), ScoreTable::new(&[6.0, 4.0, 5.0, 3.0]));
        let outcome = cluster.refine(&request()).await.unwrap();

        assert!(!outcome.approved);
        assert_eq!(outcome.content, "draft-1");
        assert!((outcome.score - 6.0).abs() < f32::EPSILON);
        assert!((outcome.history.last().unwrap().score - 3.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_approval_stops_revisions() {
        let (cluster, producer, _) = pair(NumberedProducer::default(), ScoreTable::new(&[3.0, 5.0, 7.5, 9.0]));
        let outcome = cluster.refine(&request()).await.unwrap();

        assert!(outcome.approved);
        assert_eq!(outcome.content, "draft-3");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_revision_keeps_best() {
        let producer = NumberedProducer { fail_on: Some(2), ..NumberedProducer::default() };
        let (cluster, producer, reviewer) = pair(producer, ScoreTable::new(&[4.0]));
        let outcome = cluster.refine(&request()).await.unwrap();

        assert_eq!(outcome.content, "draft-1");
        assert!(!outcome.approved);
        assert_eq!(outcome.producer_calls, 2);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_draft_is_an_error() {
        let producer = NumberedProducer { fail_on: Some(1), ..NumberedProducer::default() };
        let (cluster, _, reviewer) = pair(producer, ScoreTable::new(&[]));

        assert!(cluster.refine(&request()).await.is_err());
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_best_of_n_picks_approved_draft() {
        let (cluster, producer, reviewer) = pair(NumberedProducer::default(), ScoreTable::new(&[6.0, 9.0, 7.0]));
        let outcome = cluster.best_of_n(&request()).await.unwrap();

        assert!(outcome.approved);
        assert_eq!(outcome.content, "draft-2");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_best_of_n_seeds_revision_loop() {
        let settings = RefinementSettings { max_iterations: 1, ..RefinementSettings::default() };
        let (cluster, producer, _) = pair(NumberedProducer::default(), ScoreTable::new(&[5.0, 6.0, 4.0, 8.0]));
        let outcome = cluster.with_settings(settings).best_of_n(&request()).await.unwrap();

        assert!(outcome.approved);
        assert_eq!(outcome.content, "draft-4");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.iterations, 4);
    }

    #[tokio::test]
    async fn test_each_review_is_traced() {
        let reporter = Arc::new(TraceReporter::default());
        let (cluster, _, _) = pair(NumberedProducer::default(), ScoreTable::new(&[2.0, 8.0]));
        let cluster = cluster.with_reporter(reporter.clone());
        let mut rx = reporter.subscribe();

        cluster.refine(&request()).await.unwrap();

        assert_eq!(reporter.snapshot().refinement_iterations, 2);
        match rx.recv().await.unwrap() {
            TraceEvent::RefinementIteration { iteration, approved, .. } => {
                assert_eq!(iteration, 1);
                assert!(!approved);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
