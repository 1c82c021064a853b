//! # Database
//!
//! Combines a backing store with a candidate retrieval scheme. Two schemes
//! are provided: windowed blocking over key functions and token lookup
//! ranked by bucket selectivity.

use crate::bucket::Bucket;
use crate::config::{DEFAULT_MAX_SEARCH_HITS, DEFAULT_MIN_RELEVANCE, DEFAULT_WINDOW_SIZE};
use crate::error::{Error, Result};
use crate::index::{collect_window, BlockStore, KeyFunctions};
use crate::model::{Record, RecordId};
use crate::schema::Schema;
use crate::store::BackingStore;
use rustc_hash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Stop collecting new candidates once this many times `max_search_hits`
/// have been gathered.
const COLLECT_CUTOFF_FACTOR: usize = 20;
/// Skip score bumping for buckets larger than this many times the candidate
/// count.
const BUMP_CUTOFF_FACTOR: usize = 50;

pub trait Database: Send + Sync {
    fn is_in_memory(&self) -> bool;

    fn set_configuration(&mut self, schema: Arc<Schema>);

    /// Add or replace a record. Key function rejections surface as
    /// capability errors before anything is written.
    fn index(&mut self, record: &Record) -> Result<()>;

    fn find_candidate_matches(&self, record: &Record) -> Result<Vec<Record>>;

    fn find_record_by_id(&self, external_id: &str) -> Result<Option<Record>>;

    fn commit(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn set_overwrite(&mut self, overwrite: bool);

    fn set_window_size(&mut self, window_size: usize);

    fn set_key_functions(&mut self, functions: KeyFunctions);
}

/// External ids of a record, over every identity property.
fn external_ids(schema: &Schema, record: &Record) -> Result<Vec<String>> {
    let ids: Vec<String> = schema
        .external_ids(record)
        .into_iter()
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(Error::capability("index", format!("record {record} has no identity value")));
    }
    Ok(ids)
}

/// What to do for a record about to be indexed.
enum Slot {
    Fresh,
    Replace(RecordId),
    Skip,
}

fn resolve_slot<S: BackingStore>(store: &S, ids: &[String], overwrite: bool) -> Result<Slot> {
    for external in ids {
        if let Some(id) = store.lookup_internal_id(external)? {
            return Ok(if overwrite { Slot::Replace(id) } else { Slot::Skip });
        }
    }
    Ok(Slot::Fresh)
}

fn load_records<S: BackingStore>(store: &S, ids: Vec<RecordId>) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = store.find_record(id)? {
            records.push(record.into_owned());
        }
    }
    Ok(records)
}

/// Windowed blocking over one or more key functions.
pub struct BlockingDatabase<S, B> {
    schema: Arc<Schema>,
    store: S,
    blocks: B,
    key_functions: KeyFunctions,
    window_size: usize,
    overwrite: bool,
}

impl<S: BackingStore, B: BlockStore> BlockingDatabase<S, B> {
    pub fn new(schema: Arc<Schema>, store: S, blocks: B) -> Self {
        Self {
            schema,
            store,
            blocks,
            key_functions: Vec::new(),
            window_size: DEFAULT_WINDOW_SIZE,
            overwrite: true,
        }
    }

    pub fn with_key_functions(mut self, functions: KeyFunctions) -> Self {
        self.key_functions = functions;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blocks(&self) -> &B {
        &self.blocks
    }

    fn keys_for(&self, record: &Record) -> Result<Vec<String>> {
        self.key_functions
            .iter()
            .map(|function| function.make_key(record))
            .collect()
    }
}

impl<S: BackingStore, B: BlockStore> Database for BlockingDatabase<S, B> {
    fn is_in_memory(&self) -> bool {
        self.store.is_in_memory()
    }

    fn set_configuration(&mut self, schema: Arc<Schema>) {
        self.schema = schema;
    }

    fn index(&mut self, record: &Record) -> Result<()> {
        let ids = external_ids(&self.schema, record)?;
        let keys = self.keys_for(record)?;

        let id = match resolve_slot(&self.store, &ids, self.overwrite)? {
            Slot::Skip => return Ok(()),
            Slot::Fresh => self.store.make_new_record_id()?,
            Slot::Replace(id) => {
                if let Some(old) = self.store.find_record(id)?.map(Cow::into_owned) {
                    let old_keys = self.keys_for(&old)?;
                    for (function, key) in self.key_functions.iter().zip(&old_keys) {
                        self.blocks.remove(function.name(), key, id)?;
                    }
                }
                id
            }
        };

        self.store.register_record(id, record)?;
        for external in &ids {
            self.store.register_id(id, external)?;
        }
        for (function, key) in self.key_functions.iter().zip(&keys) {
            self.blocks.add(function.name(), key, id)?;
        }
        Ok(())
    }

    fn find_candidate_matches(&self, record: &Record) -> Result<Vec<Record>> {
        let mut found = FxHashSet::default();
        for function in &self.key_functions {
            let key = function.make_key(record)?;
            collect_window(&self.blocks, function.name(), &key, self.window_size, &mut found)?;
        }
        let mut ids: Vec<RecordId> = found.into_iter().collect();
        ids.sort_unstable();
        load_records(&self.store, ids)
    }

    fn find_record_by_id(&self, external_id: &str) -> Result<Option<Record>> {
        self.store.find_record_by_external_id(external_id)
    }

    fn commit(&mut self) -> Result<()> {
        self.blocks.commit()?;
        self.store.commit()
    }

    fn close(&mut self) -> Result<()> {
        self.commit()?;
        self.store.close()
    }

    fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size;
    }

    fn set_key_functions(&mut self, functions: KeyFunctions) {
        self.key_functions = functions;
    }
}

/// Token lookup: every lookup property value is split into tokens, each token
/// owns a bucket, and candidates are ranked by the summed selectivity of the
/// buckets they appear in.
pub struct TokenDatabase<S> {
    schema: Arc<Schema>,
    store: S,
    max_search_hits: usize,
    min_relevance: f64,
    overwrite: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: RecordId,
    score: f64,
}

impl<S: BackingStore> TokenDatabase<S> {
    pub fn new(schema: Arc<Schema>, store: S) -> Self {
        Self {
            schema,
            store,
            max_search_hits: DEFAULT_MAX_SEARCH_HITS,
            min_relevance: DEFAULT_MIN_RELEVANCE,
            overwrite: true,
        }
    }

    pub fn with_max_search_hits(mut self, max_search_hits: usize) -> Self {
        self.max_search_hits = max_search_hits;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `(property, token)` pairs a record is indexed and looked up under.
    fn tokens(&self, record: &Record) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for property in self.schema.lookup_properties() {
            let tokenized = property.comparator().is_some_and(|c| c.is_tokenized());
            for value in record.values(property.name()) {
                let parts: Vec<&str> = if tokenized {
                    value.split_whitespace().collect()
                } else {
                    vec![value.as_str()]
                };
                for token in parts {
                    let pair = (property.name().to_string(), token.to_string());
                    if !out.contains(&pair) {
                        out.push(pair);
                    }
                }
            }
        }
        out
    }

    fn lookup(&self, record: &Record) -> Result<Vec<Cow<'_, Bucket>>> {
        let mut buckets = Vec::new();
        for (property, token) in self.tokens(record) {
            let Some(bucket) = self.store.lookup_token(&property, &token)? else {
                continue;
            };
            if bucket.is_overflowed() {
                continue;
            }
            if bucket.is_dirty() {
                let mut sorted = bucket.into_owned();
                sorted.sort();
                buckets.push(Cow::Owned(sorted));
            } else {
                buckets.push(bucket);
            }
        }
        buckets.sort_by_key(|bucket| bucket.len());
        Ok(buckets)
    }

    /// Index of the first bucket whose ids are only bumped, never collected.
    /// Buckets are peeled off the large end until the peeled share of the
    /// total score reaches `min_relevance`.
    fn collect_threshold(&self, buckets: &[Cow<'_, Bucket>]) -> usize {
        let total: f64 = buckets.iter().map(|b| b.score()).sum();
        if total <= 0.0 || self.min_relevance <= 0.0 {
            return buckets.len();
        }
        let mut so_far = 0.0;
        let mut threshold = buckets.len();
        while threshold > 0 && so_far / total < self.min_relevance {
            so_far += buckets[threshold - 1].score();
            threshold -= 1;
        }
        threshold
    }
}

impl<S: BackingStore> Database for TokenDatabase<S> {
    fn is_in_memory(&self) -> bool {
        self.store.is_in_memory()
    }

    fn set_configuration(&mut self, schema: Arc<Schema>) {
        self.schema = schema;
    }

    fn index(&mut self, record: &Record) -> Result<()> {
        let ids = external_ids(&self.schema, record)?;
        let id = match resolve_slot(&self.store, &ids, self.overwrite)? {
            Slot::Skip => return Ok(()),
            Slot::Fresh => self.store.make_new_record_id()?,
            Slot::Replace(id) => {
                if let Some(old) = self.store.find_record(id)?.map(Cow::into_owned) {
                    for (property, token) in self.tokens(&old) {
                        self.store.unregister_token(id, &property, &token)?;
                    }
                }
                id
            }
        };

        self.store.register_record(id, record)?;
        for external in &ids {
            self.store.register_id(id, external)?;
        }
        for (property, token) in self.tokens(record) {
            self.store.register_token(id, &property, &token)?;
        }
        Ok(())
    }

    fn find_candidate_matches(&self, record: &Record) -> Result<Vec<Record>> {
        let buckets = self.lookup(record)?;
        let threshold = self.collect_threshold(&buckets);

        let mut candidates: FxHashMap<RecordId, f64> = FxHashMap::default();
        let collect_limit = COLLECT_CUTOFF_FACTOR.saturating_mul(self.max_search_hits);
        let mut next = 0;
        while next < threshold && candidates.len() < collect_limit {
            let bucket = &buckets[next];
            let score = bucket.score();
            for id in bucket.ids() {
                *candidates.entry(*id).or_insert(0.0) += score;
            }
            next += 1;
        }

        for bucket in &buckets[next..] {
            if bucket.len() > BUMP_CUTOFF_FACTOR.saturating_mul(candidates.len()) {
                break;
            }
            let score = bucket.score();
            for (id, total) in candidates.iter_mut() {
                if bucket.contains(*id) {
                    *total += score;
                }
            }
        }
        debug!(
            buckets = buckets.len(),
            collected = next,
            candidates = candidates.len(),
            "token lookup"
        );

        let mut ranked: Vec<Candidate> = candidates
            .into_iter()
            .map(|(id, score)| Candidate { id, score })
            .collect();
        if self.max_search_hits > ranked.len() && self.min_relevance == 0.0 {
            let mut ids: Vec<RecordId> = ranked.into_iter().map(|c| c.id).collect();
            ids.sort_unstable();
            return load_records(&self.store, ids);
        }

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        let ids = ranked
            .into_iter()
            .take(self.max_search_hits)
            .filter(|c| c.score >= self.min_relevance)
            .map(|c| c.id)
            .collect();
        load_records(&self.store, ids)
    }

    fn find_record_by_id(&self, external_id: &str) -> Result<Option<Record>> {
        self.store.find_record_by_external_id(external_id)
    }

    fn commit(&mut self) -> Result<()> {
        self.store.commit()
    }

    fn close(&mut self) -> Result<()> {
        self.store.commit()?;
        self.store.close()
    }

    fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    /// Token lookup has no window.
    fn set_window_size(&mut self, _window_size: usize) {}

    /// Token lookup does not use key functions.
    fn set_key_functions(&mut self, _functions: KeyFunctions) {}
}
