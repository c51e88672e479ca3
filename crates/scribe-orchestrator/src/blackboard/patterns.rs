//! Learned "when X, do Y" heuristics.
//!
//! Success rates follow an exponential moving average,
//! `new = 0.3 * outcome + 0.7 * old`, and stay within [0, 1].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weight of the newest outcome in the moving average.
pub const LEARNING_RATE: f64 = 0.3;

/// Observations below this confidence are not learned.
pub const MIN_LEARNING_CONFIDENCE: f64 = 0.8;

const SUCCESS_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.3;
const RECENCY_HALF_DAY_HOURS: f64 = 24.0;

/// One learned heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Unique id.
    pub id: String,
    /// Grouping, e.g. "intent".
    pub namespace: String,
    /// Observed situation.
    pub pattern: String,
    /// Preferred action.
    pub action: String,
    /// Moving-average success estimate in [0, 1].
    pub success_rate: f64,
    /// Feedback events applied.
    pub times_used: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last feedback or re-observation.
    pub last_used: DateTime<Utc>,
}

impl Pattern {
    /// Blend of success rate and recency used to rank query results.
    #[must_use]
    pub fn relevance(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.last_used).num_seconds().max(0) as f64 / 3600.0;
        let recency = 1.0 / (1.0 + age_hours / RECENCY_HALF_DAY_HOURS);
        SUCCESS_WEIGHT * self.success_rate + RECENCY_WEIGHT * recency
    }
}

/// Applies one outcome (1.0 success, 0.0 failure) to a success rate.
#[must_use]
pub fn ema_update(old: f64, outcome: f64) -> f64 {
    LEARNING_RATE.mul_add(outcome, (1.0 - LEARNING_RATE) * old).clamp(0.0, 1.0)
}

/// Capacity-bounded pattern store.
#[derive(Debug, Clone)]
pub(crate) struct PatternMemory {
    patterns: HashMap<String, Pattern>,
    capacity: usize,
}

impl PatternMemory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { patterns: HashMap::new(), capacity: capacity.max(1) }
    }

    pub(crate) fn len(&self) -> usize {
        self.patterns.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    /// Records an observation. Re-observing the same situation refreshes the
    /// existing entry instead of adding a duplicate.
    pub(crate) fn record(&mut self, namespace: &str, pattern: &str, action: &str, confidence: f64) -> String {
        let now = Utc::now();
        if let Some(existing) =
            self.patterns.values_mut().find(|p| p.namespace == namespace && p.pattern.eq_ignore_ascii_case(pattern))
        {
            existing.action = action.to_string();
            existing.last_used = now;
            return existing.id.clone();
        }

        let id = Uuid::new_v4().to_string();
        self.patterns.insert(
            id.clone(),
            Pattern {
                id: id.clone(),
                namespace: namespace.to_string(),
                pattern: pattern.to_string(),
                action: action.to_string(),
                success_rate: confidence.clamp(0.0, 1.0),
                times_used: 0,
                created_at: now,
                last_used: now,
            },
        );
        self.prune(now);
        id
    }

    /// Applies feedback and returns the new success rate.
    pub(crate) fn record_outcome(&mut self, id: &str, success: bool) -> Option<f64> {
        let pattern = self.patterns.get_mut(id)?;
        pattern.success_rate = ema_update(pattern.success_rate, if success { 1.0 } else { 0.0 });
        pattern.times_used = pattern.times_used.saturating_add(1);
        pattern.last_used = Utc::now();
        Some(pattern.success_rate)
    }

    /// Case-insensitive substring match in either direction, best first.
    pub(crate) fn query(&self, namespace: Option<&str>, text: &str, limit: usize) -> Vec<Pattern> {
        let needle = text.to_lowercase();
        let now = Utc::now();
        let mut hits: Vec<(f64, &Pattern)> = self
            .patterns
            .values()
            .filter(|p| namespace.is_none_or(|ns| p.namespace == ns))
            .filter(|p| {
                let hay = p.pattern.to_lowercase();
                hay.contains(&needle) || (!hay.is_empty() && needle.contains(&hay))
            })
            .map(|p| (p.relevance(now), p))
            .collect();

        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.last_used.cmp(&a.1.last_used)));
        hits.into_iter().take(limit).map(|(_, p)| p.clone()).collect()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while self.patterns.len() > self.capacity {
            let weakest = self
                .patterns
                .values()
                .min_by(|a, b| a.relevance(now).total_cmp(&b.relevance(now)))
                .map(|p| p.id.clone());
            match weakest {
                Some(id) => {
                    self.patterns.remove(&id);
                }
                None => break,
            }
        }
    }
}
