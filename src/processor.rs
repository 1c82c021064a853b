//! # Processor
//!
//! Drives a run: index records, retrieve candidates, score them, resolve
//! decisions and notify listeners.
//!
//! Indexing is single-threaded. Matching reads the database through `&self`
//! and runs on a rayon pool when more than one thread is configured. A record
//! whose key function or comparator rejects it is skipped with a warning;
//! any other error aborts the batch.

use crate::config::{UnilinkConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAYBE_THRESHOLD, DEFAULT_THRESHOLD};
use crate::database::{BlockingDatabase, Database, TokenDatabase};
use crate::error::{Error, Result};
use crate::index::{InMemoryBlocks, KeyFunctions};
use crate::link_store::{LinkStore, PersistentLinkStore};
use crate::listener::{DecisionKind, Decisions, LinkStoreListener, MatchListener};
use crate::model::Record;
use crate::persistence::PersistentStore;
use crate::schema::Schema;
use crate::scoring::{ProbabilityCurve, Scorer};
use crate::store::InMemoryStore;
use crate::strategy::{LinkageStrategy, Thresholds};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Snapshot of the processor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub comparisons: u64,
    pub records_indexed: u64,
    pub records_matched: u64,
    pub records_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    comparisons: AtomicU64,
    records_indexed: AtomicU64,
    records_matched: AtomicU64,
    records_skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            comparisons: self.comparisons.load(Ordering::Relaxed),
            records_indexed: self.records_indexed.load(Ordering::Relaxed),
            records_matched: self.records_matched.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
        }
    }
}

pub struct Processor {
    schema: Arc<Schema>,
    scorer: Scorer,
    database: Box<dyn Database>,
    strategy: LinkageStrategy,
    thresholds: Thresholds,
    listeners: Vec<Arc<dyn MatchListener>>,
    batch_size: usize,
    pool: Option<ThreadPool>,
    counters: Counters,
}

impl Processor {
    pub fn new(schema: Arc<Schema>, mut database: Box<dyn Database>) -> Self {
        database.set_configuration(Arc::clone(&schema));
        Self {
            scorer: Scorer::new(Arc::clone(&schema)),
            schema,
            database,
            strategy: LinkageStrategy::default(),
            thresholds: Thresholds::new(DEFAULT_THRESHOLD, DEFAULT_MAYBE_THRESHOLD),
            listeners: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            pool: None,
            counters: Counters::default(),
        }
    }

    /// Build a processor from validated configuration.
    ///
    /// With key functions the database does windowed blocking, otherwise
    /// token lookup. A storage path selects the RocksDB backing store and a
    /// link store path attaches a [`LinkStoreListener`].
    pub fn from_config(
        schema: Arc<Schema>,
        config: &UnilinkConfig,
        key_functions: KeyFunctions,
    ) -> Result<Self> {
        config.validate()?;
        let blocking = &config.blocking;
        let mut database: Box<dyn Database> = match (&config.storage.path, key_functions.is_empty()) {
            (Some(path), false) => {
                let store = PersistentStore::open_with_options(path, config.open_options())?;
                let blocks = store.block_store();
                Box::new(BlockingDatabase::new(Arc::clone(&schema), store, blocks))
            }
            (Some(path), true) => {
                let store = PersistentStore::open_with_options(path, config.open_options())?;
                Box::new(
                    TokenDatabase::new(Arc::clone(&schema), store)
                        .with_max_search_hits(blocking.max_search_hits)
                        .with_min_relevance(blocking.min_relevance),
                )
            }
            (None, false) => Box::new(BlockingDatabase::new(
                Arc::clone(&schema),
                InMemoryStore::with_bucket_capacity(blocking.bucket_capacity),
                InMemoryBlocks::with_bucket_capacity(blocking.bucket_capacity),
            )),
            (None, true) => Box::new(
                TokenDatabase::new(
                    Arc::clone(&schema),
                    InMemoryStore::with_bucket_capacity(blocking.bucket_capacity),
                )
                .with_max_search_hits(blocking.max_search_hits)
                .with_min_relevance(blocking.min_relevance),
            ),
        };
        database.set_key_functions(key_functions);
        database.set_window_size(blocking.window_size);
        database.set_overwrite(blocking.overwrite);

        let mut processor = Self::new(Arc::clone(&schema), database)
            .with_strategy(config.matching.strategy)
            .with_thresholds(config.thresholds())
            .with_curve(config.matching.curve)
            .with_batch_size(config.matching.batch_size)
            .with_threads(config.matching.threads)?;

        if let Some(path) = &config.storage.link_store_path {
            let links: Arc<dyn LinkStore> = Arc::new(PersistentLinkStore::open(path)?);
            processor.add_listener(Arc::new(LinkStoreListener::new(schema, links)));
        }
        Ok(processor)
    }

    pub fn with_strategy(mut self, strategy: LinkageStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_curve(mut self, curve: ProbabilityCurve) -> Self {
        self.scorer = Scorer::with_curve(Arc::clone(&self.schema), curve);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// More than one thread runs matching on a dedicated rayon pool.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        self.pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|ix| format!("unilink-match-{ix}"))
                .build()
                .map_err(|err| Error::config(format!("cannot start matching pool: {err}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(self)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn MatchListener>) {
        self.listeners.push(listener);
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot()
    }

    /// Index every record, then match each one against everything indexed.
    #[instrument(skip(self, records), fields(records = records.len()), level = "debug")]
    pub fn deduplicate(&mut self, records: &[Record]) -> Result<()> {
        self.start_processing();
        for batch in records.chunks(self.batch_size) {
            self.batch_ready(batch.len());
            let accepted = self.index_batch(batch)?;
            self.database.commit()?;
            self.match_batch(&accepted)?;
            self.batch_done()?;
        }
        self.end_processing()?;
        info!(stats = ?self.stats(), "deduplication finished");
        Ok(())
    }

    /// Index without matching.
    #[instrument(skip(self, records), fields(records = records.len()), level = "debug")]
    pub fn index(&mut self, records: &[Record]) -> Result<()> {
        for batch in records.chunks(self.batch_size) {
            self.index_batch(batch)?;
        }
        self.database.commit()
    }

    /// Match records against the database without indexing them.
    #[instrument(skip(self, records), fields(records = records.len()), level = "debug")]
    pub fn link_records(&self, records: &[Record]) -> Result<()> {
        self.start_processing();
        for batch in records.chunks(self.batch_size) {
            self.batch_ready(batch.len());
            let batch: Vec<&Record> = batch.iter().collect();
            self.match_batch(&batch)?;
            self.batch_done()?;
        }
        self.end_processing()
    }

    /// Record linkage between two groups: only cross-group pairs are compared.
    #[instrument(skip(self, group1, group2), fields(group1 = group1.len(), group2 = group2.len()), level = "debug")]
    pub fn link(&mut self, group1: &[Record], group2: &[Record]) -> Result<()> {
        self.index(group1)?;
        self.link_records(group2)
    }

    /// Score a single pair.
    pub fn compare(&self, r1: &Record, r2: &Record) -> Result<Option<f64>> {
        self.counters.comparisons.fetch_add(1, Ordering::Relaxed);
        self.scorer.compare(r1, r2)
    }

    pub fn close(&mut self) -> Result<()> {
        self.database.close()
    }

    /// Records that were indexed. Rejected ones are dropped from the batch.
    fn index_batch<'a>(&mut self, records: &'a [Record]) -> Result<Vec<&'a Record>> {
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            match self.database.index(record) {
                Ok(()) => {
                    self.counters.records_indexed.fetch_add(1, Ordering::Relaxed);
                    accepted.push(record);
                }
                Err(err) if err.is_capability() => {
                    warn!(%record, error = %err, "skipping record at indexing");
                    self.counters.records_skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(accepted)
    }

    fn match_batch(&self, records: &[&Record]) -> Result<()> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                records
                    .par_iter()
                    .try_for_each(|record| self.match_record(record))
            }),
            None => records.iter().try_for_each(|record| self.match_record(record)),
        }
    }

    fn match_record(&self, record: &Record) -> Result<()> {
        let candidates = match self.database.find_candidate_matches(record) {
            Ok(candidates) => candidates,
            Err(err) if err.is_capability() => {
                warn!(%record, error = %err, "skipping record at lookup");
                self.counters.records_skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let mut decisions = Decisions::default();
        let outcome = self.strategy.compare(
            &self.scorer,
            record,
            &candidates,
            self.thresholds,
            &mut decisions,
        )?;
        self.counters
            .comparisons
            .fetch_add(outcome.comparisons as u64, Ordering::Relaxed);
        debug!(
            %record,
            candidates = candidates.len(),
            decisions = decisions.decisions.len(),
            skipped_pairs = outcome.skipped,
            "record matched"
        );

        for listener in &self.listeners {
            for decision in &decisions.decisions {
                match decision.kind {
                    DecisionKind::Match => {
                        listener.matches(record, &decision.candidate, decision.confidence)
                    }
                    DecisionKind::MaybeMatch => {
                        listener.matches_perhaps(record, &decision.candidate, decision.confidence)
                    }
                }
            }
            if decisions.no_match {
                listener.no_match_for(record);
            }
            listener.record_done(record, &decisions.decisions)?;
        }
        self.counters.records_matched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn start_processing(&self) {
        for listener in &self.listeners {
            listener.start_processing();
        }
    }

    fn batch_ready(&self, size: usize) {
        for listener in &self.listeners {
            listener.batch_ready(size);
        }
    }

    fn batch_done(&self) -> Result<()> {
        for listener in &self.listeners {
            listener.batch_done()?;
        }
        Ok(())
    }

    fn end_processing(&self) -> Result<()> {
        for listener in &self.listeners {
            listener.end_processing()?;
        }
        Ok(())
    }
}
