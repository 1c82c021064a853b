//! # Match Resolution
//!
//! Strategies that turn candidate scores into match, possible-match and
//! no-match decisions.

use crate::error::Result;
use crate::model::Record;
use crate::scoring::Scorer;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Receives the decisions a strategy makes for one query record.
pub trait MatchSink {
    fn register_match(&mut self, record: &Record, candidate: &Record, confidence: f64);

    fn register_match_perhaps(&mut self, record: &Record, candidate: &Record, confidence: f64);

    fn register_no_match_for(&mut self, record: &Record);
}

/// Acceptance thresholds. A `maybe_threshold` of zero disables the
/// possible-match tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub threshold: f64,
    pub maybe_threshold: f64,
}

impl Thresholds {
    pub fn new(threshold: f64, maybe_threshold: f64) -> Self {
        Self {
            threshold,
            maybe_threshold,
        }
    }

    fn is_match(&self, prob: f64) -> bool {
        prob > self.threshold
    }

    fn is_maybe(&self, prob: f64) -> bool {
        self.maybe_threshold > 0.0 && prob > self.maybe_threshold && prob <= self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkageStrategy {
    /// Every candidate above the threshold is a match.
    #[default]
    Simple,
    /// Only the single best candidate can match.
    Best,
    /// The best candidate above the threshold matches; every candidate in
    /// the possible tier is reported as well.
    Mix,
}

/// Counters for one `compare` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOutcome {
    pub comparisons: usize,
    pub skipped: usize,
}

impl LinkageStrategy {
    pub fn compare(
        self,
        scorer: &Scorer,
        record: &Record,
        candidates: &[Record],
        thresholds: Thresholds,
        sink: &mut dyn MatchSink,
    ) -> Result<CompareOutcome> {
        let mut outcome = CompareOutcome::default();
        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
        for (ix, candidate) in candidates.iter().enumerate() {
            if scorer.is_same_as(record, candidate) {
                continue;
            }
            outcome.comparisons += 1;
            match scorer.compare(record, candidate) {
                Ok(Some(prob)) => scored.push((ix, prob)),
                Ok(None) => {}
                Err(err) if err.is_capability() => {
                    warn!(%record, %candidate, error = %err, "skipping pair");
                    outcome.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let mut decided = false;
        match self {
            LinkageStrategy::Simple => {
                for &(ix, prob) in &scored {
                    if thresholds.is_match(prob) {
                        sink.register_match(record, &candidates[ix], prob);
                        decided = true;
                    } else if thresholds.is_maybe(prob) {
                        sink.register_match_perhaps(record, &candidates[ix], prob);
                        decided = true;
                    }
                }
            }
            LinkageStrategy::Best => {
                if let Some((ix, prob)) = best_of(&scored) {
                    if thresholds.is_match(prob) {
                        sink.register_match(record, &candidates[ix], prob);
                        decided = true;
                    } else if thresholds.is_maybe(prob) {
                        sink.register_match_perhaps(record, &candidates[ix], prob);
                        decided = true;
                    }
                }
            }
            LinkageStrategy::Mix => {
                if let Some((ix, prob)) = best_of(&scored).filter(|(_, p)| thresholds.is_match(*p)) {
                    sink.register_match(record, &candidates[ix], prob);
                    decided = true;
                }
                for &(ix, prob) in &scored {
                    if thresholds.is_maybe(prob) {
                        sink.register_match_perhaps(record, &candidates[ix], prob);
                        decided = true;
                    }
                }
            }
        }

        if !decided {
            sink.register_no_match_for(record);
        }
        Ok(outcome)
    }
}

/// Highest score; the earliest candidate wins ties.
fn best_of(scored: &[(usize, f64)]) -> Option<(usize, f64)> {
    scored
        .iter()
        .copied()
        .fold(None, |best: Option<(usize, f64)>, (ix, prob)| match best {
            Some((_, top)) if top >= prob => best,
            _ => Some((ix, prob)),
        })
}
