//! # Blocking Index
//!
//! Key functions map records to blocking keys; a [`BlockStore`] keeps, per
//! key function, an ordered map from key to [`Bucket`]. Candidate retrieval
//! walks that order outward from the query key.

use crate::bucket::Bucket;
use crate::config::{DEFAULT_BUCKET_CAPACITY, DEFAULT_WINDOW_SIZE};
use crate::error::Result;
use crate::model::{Record, RecordId};
use hashbrown::HashMap;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

pub trait KeyFunction: Send + Sync + fmt::Debug {
    fn make_key(&self, record: &Record) -> Result<String>;

    /// Stable identifier; persistent block stores address their maps by it.
    fn name(&self) -> &str;
}

/// What to take from a property value when building a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransform {
    Value,
    /// First whitespace token with more than N characters.
    FirstLongerThan(usize),
    /// Last whitespace token with more than N characters.
    LastLongerThan(usize),
    /// ASCII digits only.
    Digits,
    /// First N characters.
    Prefix(usize),
}

impl KeyTransform {
    pub fn apply(self, value: &str) -> String {
        match self {
            KeyTransform::Value => value.to_string(),
            KeyTransform::FirstLongerThan(n) => value
                .split_whitespace()
                .find(|token| token.chars().count() > n)
                .unwrap_or_default()
                .to_string(),
            KeyTransform::LastLongerThan(n) => value
                .split_whitespace()
                .rev()
                .find(|token| token.chars().count() > n)
                .unwrap_or_default()
                .to_string(),
            KeyTransform::Digits => value.chars().filter(char::is_ascii_digit).collect(),
            KeyTransform::Prefix(n) => value.chars().take(n).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPart {
    pub property: String,
    pub transform: KeyTransform,
}

/// Concatenation of transformed property values. Missing properties
/// contribute nothing.
#[derive(Debug, Clone)]
pub struct CompositeKey {
    name: String,
    parts: Vec<KeyPart>,
}

impl CompositeKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
        }
    }

    pub fn part(mut self, property: impl Into<String>, transform: KeyTransform) -> Self {
        self.parts.push(KeyPart {
            property: property.into(),
            transform,
        });
        self
    }
}

impl KeyFunction for CompositeKey {
    fn make_key(&self, record: &Record) -> Result<String> {
        let mut key = String::new();
        for part in &self.parts {
            if let Some(value) = record.value(&part.property) {
                key.push_str(&part.transform.apply(value));
            }
        }
        Ok(key)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

type KeyFn = dyn Fn(&Record) -> Result<String> + Send + Sync;

/// Adapter for ad hoc key functions.
pub struct FnKey {
    name: String,
    func: Box<KeyFn>,
}

impl FnKey {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnKey").field("name", &self.name).finish()
    }
}

impl KeyFunction for FnKey {
    fn make_key(&self, record: &Record) -> Result<String> {
        (self.func)(record)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub type KeyFunctions = Vec<Arc<dyn KeyFunction>>;

/// An ordered-map entry: the key and its bucket.
pub type BlockEntry<'a> = (String, Cow<'a, Bucket>);

/// Ordered map of buckets per key function.
pub trait BlockStore: Send + Sync {
    fn add(&mut self, function: &str, key: &str, id: RecordId) -> Result<()>;

    /// Returns false when the id was not in the bucket.
    fn remove(&mut self, function: &str, key: &str, id: RecordId) -> Result<bool>;

    /// Smallest entry whose key is `>= key`.
    fn ceiling(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>>;

    /// Largest entry whose key is `< key`.
    fn lower(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>>;

    /// Smallest entry whose key is `> key`.
    fn higher(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>>;

    fn commit(&mut self) -> Result<()>;
}

/// Gather the candidates for `key` under one key function into `out`.
///
/// Takes the ceiling bucket, then unless that bucket alone exceeds twice the
/// window, walks neighbouring entries on each side until roughly
/// `window_size` ids have been collected per side. Never mutates the store.
pub fn collect_window<B: BlockStore + ?Sized>(
    blocks: &B,
    function: &str,
    key: &str,
    window_size: usize,
    out: &mut FxHashSet<RecordId>,
) -> Result<()> {
    let Some((ceiling_key, bucket)) = blocks.ceiling(function, key)? else {
        return Ok(());
    };
    let added = bucket.len();
    out.extend(bucket.ids().iter().copied());
    if added > 2 * window_size {
        return Ok(());
    }

    let mut total = added / 2;
    let mut cursor = ceiling_key.clone();
    while total < window_size {
        let Some((lower_key, neighbour)) = blocks.lower(function, &cursor)? else {
            break;
        };
        total += neighbour.len();
        out.extend(neighbour.ids().iter().copied());
        cursor = lower_key;
    }

    total = added / 2;
    cursor = ceiling_key;
    while total < window_size {
        let Some((higher_key, neighbour)) = blocks.higher(function, &cursor)? else {
            break;
        };
        total += neighbour.len();
        out.extend(neighbour.ids().iter().copied());
        cursor = higher_key;
    }
    Ok(())
}

/// Heap-resident block store: one `BTreeMap` per key function.
#[derive(Debug, Clone)]
pub struct InMemoryBlocks {
    maps: HashMap<String, BTreeMap<String, Bucket>>,
    bucket_capacity: usize,
}

impl InMemoryBlocks {
    pub fn new() -> Self {
        Self::with_bucket_capacity(DEFAULT_BUCKET_CAPACITY)
    }

    pub fn with_bucket_capacity(bucket_capacity: usize) -> Self {
        Self {
            maps: HashMap::new(),
            bucket_capacity,
        }
    }

    pub fn key_count(&self, function: &str) -> usize {
        self.maps.get(function).map_or(0, BTreeMap::len)
    }

    fn entry<'a>(
        &'a self,
        function: &str,
        range: (Bound<&str>, Bound<&str>),
        last: bool,
    ) -> Option<BlockEntry<'a>> {
        let map = self.maps.get(function)?;
        let mut iter = map.range::<str, _>(range);
        let found = if last { iter.next_back() } else { iter.next() };
        found.map(|(key, bucket)| (key.clone(), Cow::Borrowed(bucket)))
    }
}

impl Default for InMemoryBlocks {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for InMemoryBlocks {
    fn add(&mut self, function: &str, key: &str, id: RecordId) -> Result<()> {
        let capacity = self.bucket_capacity;
        self.maps
            .entry_ref(function)
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Bucket::with_capacity_limit(capacity))
            .add(id);
        Ok(())
    }

    fn remove(&mut self, function: &str, key: &str, id: RecordId) -> Result<bool> {
        let Some(map) = self.maps.get_mut(function) else {
            return Ok(false);
        };
        let Some(bucket) = map.get_mut(key) else {
            return Ok(false);
        };
        let removed = bucket.remove(id);
        if bucket.is_empty() && !bucket.is_overflowed() {
            map.remove(key);
        }
        Ok(removed)
    }

    fn ceiling(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        Ok(self.entry(function, (Bound::Included(key), Bound::Unbounded), false))
    }

    fn lower(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        Ok(self.entry(function, (Bound::Unbounded, Bound::Excluded(key)), true))
    }

    fn higher(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        Ok(self.entry(function, (Bound::Excluded(key), Bound::Unbounded), false))
    }

    fn commit(&mut self) -> Result<()> {
        for map in self.maps.values_mut() {
            for bucket in map.values_mut() {
                bucket.sort();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn blocks_with(entries: &[(&str, &[u64])]) -> InMemoryBlocks {
        let mut blocks = InMemoryBlocks::new();
        for (key, ids) in entries {
            for id in *ids {
                blocks.add("name", key, RecordId(*id)).unwrap();
            }
        }
        blocks
    }

    fn window(blocks: &InMemoryBlocks, key: &str, size: usize) -> Vec<u64> {
        let mut out = FxHashSet::default();
        collect_window(blocks, "name", key, size, &mut out).unwrap();
        let mut ids: Vec<u64> = out.into_iter().map(|id| id.0).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn transforms_extract_key_material() {
        assert_eq!(KeyTransform::FirstLongerThan(2).apply("j a smith jr"), "smith");
        assert_eq!(KeyTransform::LastLongerThan(2).apply("j a smith jr"), "smith");
        assert_eq!(KeyTransform::LastLongerThan(1).apply("j a smith jr"), "jr");
        assert_eq!(KeyTransform::Digits.apply("+47 22-33"), "472233");
        assert_eq!(KeyTransform::Prefix(3).apply("lovelace"), "lov");
        assert_eq!(KeyTransform::Prefix(30).apply("ada"), "ada");
    }

    #[test]
    fn composite_key_concatenates_parts() {
        let key = CompositeKey::new("surname-zip")
            .part("NAME", KeyTransform::LastLongerThan(2))
            .part("ZIP", KeyTransform::Prefix(2));
        let record = Record::from_pairs([("NAME", "ada lovelace"), ("ZIP", "0150")]);
        assert_eq!(key.make_key(&record).unwrap(), "lovelace01");
        assert_eq!(key.make_key(&Record::new()).unwrap(), "");
        assert_eq!(key.name(), "surname-zip");
    }

    #[test]
    fn fn_key_surfaces_rejections() {
        let key = FnKey::new("strict", |record: &Record| {
            record
                .value("NAME")
                .map(str::to_lowercase)
                .ok_or_else(|| Error::capability("strict", "record has no NAME"))
        });
        assert!(key.make_key(&Record::new()).unwrap_err().is_capability());
    }

    #[test]
    fn ordered_navigation() {
        let blocks = blocks_with(&[("b", &[1]), ("d", &[2]), ("f", &[3])]);
        assert_eq!(blocks.ceiling("name", "c").unwrap().unwrap().0, "d");
        assert_eq!(blocks.ceiling("name", "d").unwrap().unwrap().0, "d");
        assert_eq!(blocks.lower("name", "d").unwrap().unwrap().0, "b");
        assert_eq!(blocks.higher("name", "d").unwrap().unwrap().0, "f");
        assert!(blocks.ceiling("name", "g").unwrap().is_none());
        assert!(blocks.lower("name", "b").unwrap().is_none());
        assert!(blocks.ceiling("other", "a").unwrap().is_none());
    }

    #[test]
    fn window_walks_both_directions() {
        let blocks = blocks_with(&[
            ("a", &[1]),
            ("b", &[2]),
            ("c", &[3]),
            ("d", &[4]),
            ("e", &[5]),
        ]);
        assert_eq!(window(&blocks, "c", 1), vec![2, 3, 4]);
        assert_eq!(window(&blocks, "c", 2), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_window_returns_only_ceiling_bucket() {
        let blocks = blocks_with(&[("a", &[1]), ("c", &[2, 3]), ("e", &[4])]);
        assert_eq!(window(&blocks, "b", 0), vec![2, 3]);
    }

    #[test]
    fn large_ceiling_bucket_stops_expansion() {
        let big: Vec<u64> = (10..21).collect();
        let blocks = blocks_with(&[("a", &[1]), ("m", &big), ("z", &[2])]);
        let ids = window(&blocks, "m", 5);
        assert_eq!(ids.len(), 11);
        assert!(!ids.contains(&1));
        assert!(!ids.contains(&2));
    }

    #[test]
    fn key_past_the_end_has_no_candidates() {
        let blocks = blocks_with(&[("a", &[1])]);
        assert!(window(&blocks, "b", 5).is_empty());
    }

    #[test]
    fn window_does_not_mutate_blocks() {
        let blocks = blocks_with(&[("a", &[1]), ("b", &[2])]);
        let before = blocks.key_count("name");
        window(&blocks, "a", 5);
        assert_eq!(blocks.key_count("name"), before);
    }

    #[test]
    fn removing_last_id_drops_the_entry() {
        let mut blocks = blocks_with(&[("a", &[1]), ("b", &[2])]);
        assert!(blocks.remove("name", "a", RecordId(1)).unwrap());
        assert!(!blocks.remove("name", "a", RecordId(1)).unwrap());
        assert_eq!(blocks.ceiling("name", "").unwrap().unwrap().0, "b");
    }
}
