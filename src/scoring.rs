//! # Scoring Engine
//!
//! Turns per-property similarities into a single match probability with
//! naive Bayes combination.

use crate::error::Result;
use crate::model::Record;
use crate::schema::{Lookup, Property, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NEUTRAL_PRIOR: f64 = 0.5;

/// Maps a similarity in `[0, 1]` onto a property's `[low, high]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbabilityCurve {
    /// `low + sim * (high - low)`.
    #[default]
    Linear,
    /// Below 0.5 similarity the value is `low`; above it the probability
    /// climbs quadratically from 0.5 to `high`.
    Damped,
}

impl ProbabilityCurve {
    pub fn apply(self, low: f64, high: f64, sim: f64) -> f64 {
        let sim = sim.clamp(0.0, 1.0);
        match self {
            ProbabilityCurve::Linear => low + sim * (high - low),
            ProbabilityCurve::Damped => {
                if sim >= 0.5 {
                    0.5 + (high - 0.5) * sim * sim
                } else {
                    low
                }
            }
        }
    }
}

/// Incremental Bayes update of `prior` with evidence `p`.
pub fn combine(prior: f64, p: f64) -> f64 {
    let agree = prior * p;
    let disagree = (1.0 - prior) * (1.0 - p);
    let total = agree + disagree;
    if total == 0.0 {
        // certain evidence contradicting a certain prior
        return prior;
    }
    agree / total
}

#[derive(Debug, Clone)]
pub struct Scorer {
    schema: Arc<Schema>,
    curve: ProbabilityCurve,
}

impl Scorer {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_curve(schema, ProbabilityCurve::default())
    }

    pub fn with_curve(schema: Arc<Schema>, curve: ProbabilityCurve) -> Self {
        Self { schema, curve }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn curve(&self) -> ProbabilityCurve {
        self.curve
    }

    /// Match probability of two records, or `None` when a required property
    /// is missing on either side.
    pub fn compare(&self, r1: &Record, r2: &Record) -> Result<Option<f64>> {
        let mut prob = NEUTRAL_PRIOR;
        for property in self.schema.scored_properties() {
            let v1 = r1.values(property.name());
            let v2 = r2.values(property.name());
            if v1.is_empty() || v2.is_empty() {
                if property.lookup() == Lookup::Required {
                    return Ok(None);
                }
                continue;
            }
            let best = self.best_agreement(property, v1, v2)?;
            prob = combine(prob, best);
        }
        Ok(Some(prob))
    }

    fn best_agreement(&self, property: &Property, v1: &[String], v2: &[String]) -> Result<f64> {
        let Some(comparator) = property.comparator() else {
            return Ok(NEUTRAL_PRIOR);
        };
        let mut best = f64::MIN;
        for a in v1 {
            for b in v2 {
                let sim = comparator.compare(a, b)?;
                let p = self.curve.apply(property.low(), property.high(), sim);
                best = best.max(p);
            }
        }
        Ok(best)
    }

    /// True when the records share any identity value.
    pub fn is_same_as(&self, r1: &Record, r2: &Record) -> bool {
        self.schema.identity_properties().any(|property| {
            let v2 = r2.values(property.name());
            r1.values(property.name()).iter().any(|v| v2.contains(v))
        })
    }
}
