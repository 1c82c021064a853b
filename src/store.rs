//! # Store Module
//!
//! The backing store contract: record bodies, the external-to-internal id map
//! and token buckets. Readers take `&self`; all writers take `&mut self`, so a
//! store has exactly one writer at a time.

use crate::bucket::Bucket;
use crate::config::DEFAULT_BUCKET_CAPACITY;
use crate::error::Result;
use crate::model::{Record, RecordId};
use hashbrown::HashMap;
use std::borrow::Cow;

pub trait BackingStore: Send + Sync {
    fn is_in_memory(&self) -> bool;

    fn make_new_record_id(&mut self) -> Result<RecordId>;

    /// Store (or replace) the body of a record.
    fn register_record(&mut self, id: RecordId, record: &Record) -> Result<()>;

    fn register_id(&mut self, id: RecordId, external_id: &str) -> Result<()>;

    fn register_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()>;

    /// Drop `id` from a token bucket. Used when a record is overwritten.
    fn unregister_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()>;

    fn lookup_internal_id(&self, external_id: &str) -> Result<Option<RecordId>>;

    fn find_record_by_external_id(&self, external_id: &str) -> Result<Option<Record>> {
        match self.lookup_internal_id(external_id)? {
            Some(id) => Ok(self.find_record(id)?.map(Cow::into_owned)),
            None => Ok(None),
        }
    }

    fn find_record(&self, id: RecordId) -> Result<Option<Cow<'_, Record>>>;

    fn lookup_token(&self, property: &str, token: &str) -> Result<Option<Cow<'_, Bucket>>>;

    fn commit(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub(crate) fn token_key(property: &str, token: &str) -> String {
    let mut key = String::with_capacity(property.len() + token.len() + 1);
    key.push_str(property);
    key.push('|');
    key.push_str(token);
    key
}

/// Heap-resident backing store. `commit` sorts every token bucket.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    records: HashMap<RecordId, Record>,
    ids: HashMap<String, RecordId>,
    tokens: HashMap<String, Bucket>,
    next_record_id: u64,
    bucket_capacity: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_bucket_capacity(DEFAULT_BUCKET_CAPACITY)
    }

    pub fn with_bucket_capacity(bucket_capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            ids: HashMap::new(),
            tokens: HashMap::new(),
            next_record_id: 0,
            bucket_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for InMemoryStore {
    fn is_in_memory(&self) -> bool {
        true
    }

    fn make_new_record_id(&mut self) -> Result<RecordId> {
        let id = RecordId(self.next_record_id);
        self.next_record_id += 1;
        Ok(id)
    }

    fn register_record(&mut self, id: RecordId, record: &Record) -> Result<()> {
        self.records.insert(id, record.clone());
        Ok(())
    }

    fn register_id(&mut self, id: RecordId, external_id: &str) -> Result<()> {
        self.ids.insert(external_id.to_string(), id);
        Ok(())
    }

    fn register_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()> {
        let capacity = self.bucket_capacity;
        self.tokens
            .entry(token_key(property, token))
            .or_insert_with(|| Bucket::with_capacity_limit(capacity))
            .add(id);
        Ok(())
    }

    fn unregister_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()> {
        if let Some(bucket) = self.tokens.get_mut(&token_key(property, token)) {
            bucket.remove(id);
        }
        Ok(())
    }

    fn lookup_internal_id(&self, external_id: &str) -> Result<Option<RecordId>> {
        Ok(self.ids.get(external_id).copied())
    }

    fn find_record(&self, id: RecordId) -> Result<Option<Cow<'_, Record>>> {
        Ok(self.records.get(&id).map(Cow::Borrowed))
    }

    fn lookup_token(&self, property: &str, token: &str) -> Result<Option<Cow<'_, Bucket>>> {
        Ok(self.tokens.get(&token_key(property, token)).map(Cow::Borrowed))
    }

    fn commit(&mut self) -> Result<()> {
        for bucket in self.tokens.values_mut() {
            bucket.sort();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
