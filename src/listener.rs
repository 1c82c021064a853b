//! # Match Listeners
//!
//! Observers of the matching process. Every method has a no-op default so a
//! listener only implements what it cares about.

use crate::classes::EquivalenceClasses;
use crate::error::Result;
use crate::link::{Link, LinkKind, LinkStatus};
use crate::link_store::LinkStore;
use crate::model::Record;
use crate::schema::Schema;
use crate::strategy::MatchSink;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Match,
    MaybeMatch,
}

/// One accepted or possible match for a query record.
#[derive(Debug, Clone)]
pub struct Decision {
    pub candidate: Record,
    pub confidence: f64,
    pub kind: DecisionKind,
}

/// Decisions for one query record, as collected from a strategy.
#[derive(Debug, Default)]
pub struct Decisions {
    pub decisions: Vec<Decision>,
    pub no_match: bool,
}

impl MatchSink for Decisions {
    fn register_match(&mut self, _record: &Record, candidate: &Record, confidence: f64) {
        self.decisions.push(Decision {
            candidate: candidate.clone(),
            confidence,
            kind: DecisionKind::Match,
        });
    }

    fn register_match_perhaps(&mut self, _record: &Record, candidate: &Record, confidence: f64) {
        self.decisions.push(Decision {
            candidate: candidate.clone(),
            confidence,
            kind: DecisionKind::MaybeMatch,
        });
    }

    fn register_no_match_for(&mut self, _record: &Record) {
        self.no_match = true;
    }
}

pub trait MatchListener: Send + Sync {
    fn start_processing(&self) {}

    fn batch_ready(&self, _size: usize) {}

    fn matches(&self, _r1: &Record, _r2: &Record, _confidence: f64) {}

    fn matches_perhaps(&self, _r1: &Record, _r2: &Record, _confidence: f64) {}

    fn no_match_for(&self, _record: &Record) {}

    /// Called once per query record after all its decisions were delivered.
    fn record_done(&self, _record: &Record, _decisions: &[Decision]) -> Result<()> {
        Ok(())
    }

    fn batch_done(&self) -> Result<()> {
        Ok(())
    }

    fn end_processing(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes inferred links for every decision and retracts inferred links
/// the latest run no longer supports.
pub struct LinkStoreListener {
    schema: Arc<Schema>,
    store: Arc<dyn LinkStore>,
}

impl LinkStoreListener {
    pub fn new(schema: Arc<Schema>, store: Arc<dyn LinkStore>) -> Self {
        Self { schema, store }
    }

    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }
}

impl MatchListener for LinkStoreListener {
    fn record_done(&self, record: &Record, decisions: &[Decision]) -> Result<()> {
        let Some(id) = self.schema.external_id(record) else {
            return Ok(());
        };

        let fresh: Vec<Link> = decisions
            .iter()
            .filter_map(|decision| {
                let other = self.schema.external_id(&decision.candidate)?;
                let kind = match decision.kind {
                    DecisionKind::Match => LinkKind::Same,
                    DecisionKind::MaybeMatch => LinkKind::MaybeSame,
                };
                Some(Link::new(id, other, kind, LinkStatus::Inferred, decision.confidence))
            })
            .collect();

        for stored in self.store.get_all_links_for(id)? {
            let supported = fresh.iter().any(|link| link.same_pair(&stored));
            if stored.status() == LinkStatus::Inferred && !supported {
                debug!(link = %stored, "retracting unsupported link");
                self.store.assert_link(stored.retracted())?;
            }
        }

        for link in fresh {
            self.store.assert_link(link)?;
        }
        Ok(())
    }

    fn batch_done(&self) -> Result<()> {
        self.store.commit()
    }

    fn end_processing(&self) -> Result<()> {
        self.store.commit()
    }
}

/// Folds confident matches into equivalence classes.
pub struct ClassListener {
    schema: Arc<Schema>,
    classes: Arc<EquivalenceClasses>,
}

impl ClassListener {
    pub fn new(schema: Arc<Schema>, classes: Arc<EquivalenceClasses>) -> Self {
        Self { schema, classes }
    }

    pub fn classes(&self) -> &Arc<EquivalenceClasses> {
        &self.classes
    }
}

impl MatchListener for ClassListener {
    fn matches(&self, r1: &Record, r2: &Record, _confidence: f64) {
        if let (Some(a), Some(b)) = (self.schema.external_id(r1), self.schema.external_id(r2)) {
            self.classes.add_link(a, b);
        }
    }
}

/// Emits one tracing event per decision.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl MatchListener for LoggingListener {
    fn batch_ready(&self, size: usize) {
        info!(size, "batch ready");
    }

    fn matches(&self, r1: &Record, r2: &Record, confidence: f64) {
        info!(%r1, %r2, confidence, "match");
    }

    fn matches_perhaps(&self, r1: &Record, r2: &Record, confidence: f64) {
        info!(%r1, %r2, confidence, "possible match");
    }

    fn no_match_for(&self, record: &Record) {
        debug!(%record, "no match");
    }

    fn batch_done(&self) -> Result<()> {
        info!("batch done");
        Ok(())
    }
}
