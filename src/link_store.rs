//! # Link Store
//!
//! Versioned storage of link decisions with override reconciliation and
//! change queries for incremental consumers.
//!
//! Change queries use exclusive bounds (`since < timestamp < before`) and
//! return links newest first. A link's stored timestamp is the time of the
//! write that last changed it. Links sharing a timestamp are ordered by their
//! encoded pair key, the same way in every store.

use crate::error::{Error, Result};
use crate::link::{now_millis, Link};
use crate::persistence::{cf, clear_cf, open_db, validate_or_init_manifest, CF_METADATA};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub trait LinkStore: Send + Sync {
    /// Store `link` unless the stored link for the pair wins the override
    /// check or already records the same decision. Returns true when the
    /// stored link changed. The stored copy is stamped with the write time,
    /// never earlier than the link's own or the replaced link's timestamp.
    fn assert_link(&self, link: Link) -> Result<bool>;

    fn get_all_links_for(&self, id: &str) -> Result<Vec<Link>>;

    fn get_all_links(&self) -> Result<Vec<Link>>;

    fn get_changes_since(&self, since: i64) -> Result<Vec<Link>> {
        self.get_changes_page(Some(since), None, usize::MAX)
    }

    fn get_changes_between(&self, since: Option<i64>, before: Option<i64>) -> Result<Vec<Link>> {
        self.get_changes_page(since, before, usize::MAX)
    }

    /// At most `page_size` of the newest links in the window.
    fn get_changes_page(
        &self,
        since: Option<i64>,
        before: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<Link>>;

    fn commit(&self) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

fn supersedes(incoming: &Link, stored: Option<&Link>) -> bool {
    match stored {
        None => true,
        Some(stored) => incoming.overrides(stored) && !incoming.same_decision(stored),
    }
}

/// Last-modified stamp for a write replacing `stored`.
fn stamped(link: Link, stored: Option<&Link>) -> Link {
    let floor = stored.map_or(i64::MIN, Link::timestamp);
    let timestamp = now_millis().max(link.timestamp()).max(floor);
    link.with_timestamp(timestamp)
}

/// `[lower, upper)` timestamp range for exclusive bounds, or `None` if empty.
fn time_range(since: Option<i64>, before: Option<i64>) -> Option<(i64, i64)> {
    let lower = since.map_or(i64::MIN, |s| s.saturating_add(1));
    let upper = before.unwrap_or(i64::MAX);
    (lower < upper).then_some((lower, upper))
}

type Pair = (String, String);

fn pair_of(link: &Link) -> Pair {
    (link.id1().to_string(), link.id2().to_string())
}

#[derive(Debug, Default)]
struct LinkTable {
    links: HashMap<Pair, Link>,
    by_time: BTreeMap<i64, HashSet<Pair>>,
    by_id: HashMap<String, HashSet<Pair>>,
}

impl LinkTable {
    fn unindex_time(&mut self, timestamp: i64, pair: &Pair) {
        if let Some(pairs) = self.by_time.get_mut(&timestamp) {
            pairs.remove(pair);
            if pairs.is_empty() {
                self.by_time.remove(&timestamp);
            }
        }
    }
}

/// Heap-resident link store. A single write lock serializes assertions.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    table: RwLock<LinkTable>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LinkStore for InMemoryLinkStore {
    fn assert_link(&self, link: Link) -> Result<bool> {
        let mut table = self.table.write();
        let pair = pair_of(&link);
        let stored = table.links.get(&pair);
        if !supersedes(&link, stored) {
            return Ok(false);
        }
        let link = stamped(link, stored);
        if let Some(old_ts) = stored.map(Link::timestamp) {
            table.unindex_time(old_ts, &pair);
        }
        table
            .by_time
            .entry(link.timestamp())
            .or_default()
            .insert(pair.clone());
        for id in [&pair.0, &pair.1] {
            table
                .by_id
                .entry_ref(id.as_str())
                .or_default()
                .insert(pair.clone());
        }
        table.links.insert(pair, link);
        Ok(true)
    }

    fn get_all_links_for(&self, id: &str) -> Result<Vec<Link>> {
        let table = self.table.read();
        let mut links: Vec<Link> = table
            .by_id
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|pair| table.links.get(pair).cloned())
            .collect();
        links.sort_by_cached_key(|link| encode_pair(link.id1(), link.id2()));
        Ok(links)
    }

    fn get_all_links(&self) -> Result<Vec<Link>> {
        let table = self.table.read();
        let mut links: Vec<Link> = table.links.values().cloned().collect();
        links.sort_by_cached_key(|link| encode_pair(link.id1(), link.id2()));
        Ok(links)
    }

    fn get_changes_page(
        &self,
        since: Option<i64>,
        before: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<Link>> {
        let Some((lower, upper)) = time_range(since, before) else {
            return Ok(Vec::new());
        };
        let table = self.table.read();
        let mut out = Vec::new();
        for (_, pairs) in table.by_time.range(lower..upper).rev() {
            let mut pairs: Vec<&Pair> = pairs.iter().collect();
            pairs.sort_by_cached_key(|pair| Reverse(encode_pair(&pair.0, &pair.1)));
            for pair in pairs {
                if out.len() >= page_size {
                    return Ok(out);
                }
                if let Some(link) = table.links.get(pair) {
                    out.push(link.clone());
                }
            }
        }
        Ok(out)
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.table.write() = LinkTable::default();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

const CF_LINKS: &str = "links";
const CF_BY_TIME: &str = "by-time";
const CF_BY_ID: &str = "by-id";

/// RocksDB link store. Link rows are keyed by pair; secondary indexes order
/// pairs by timestamp and group them by id.
pub struct PersistentLinkStore {
    db: DB,
    writer: Mutex<()>,
}

impl PersistentLinkStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = open_db(path.as_ref(), &[CF_LINKS, CF_BY_TIME, CF_BY_ID, CF_METADATA])?;
        validate_or_init_manifest(&db, "link-store")?;
        debug!(path = %path.as_ref().display(), "opened link store");
        Ok(Self {
            db,
            writer: Mutex::new(()),
        })
    }

    fn load(&self, pair_key: &[u8]) -> Result<Option<Link>> {
        let links_cf = cf(&self.db, CF_LINKS)?;
        match self.db.get_cf(links_cf, pair_key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl LinkStore for PersistentLinkStore {
    fn assert_link(&self, link: Link) -> Result<bool> {
        let _guard = self.writer.lock();
        let pair = encode_pair(link.id1(), link.id2());
        let stored = self.load(&pair)?;
        if !supersedes(&link, stored.as_ref()) {
            return Ok(false);
        }
        let link = stamped(link, stored.as_ref());

        let links_cf = cf(&self.db, CF_LINKS)?;
        let time_cf = cf(&self.db, CF_BY_TIME)?;
        let id_cf = cf(&self.db, CF_BY_ID)?;
        let mut batch = WriteBatch::default();
        if let Some(old) = &stored {
            batch.delete_cf(time_cf, time_key(old.timestamp(), &pair));
        }
        batch.put_cf(links_cf, &pair, bincode::serialize(&link)?);
        batch.put_cf(time_cf, time_key(link.timestamp(), &pair), []);
        batch.put_cf(id_cf, id_key(link.id1(), &pair), []);
        batch.put_cf(id_cf, id_key(link.id2(), &pair), []);
        self.db.write(batch)?;
        Ok(true)
    }

    fn get_all_links_for(&self, id: &str) -> Result<Vec<Link>> {
        let id_cf = cf(&self.db, CF_BY_ID)?;
        let prefix = id_prefix(id);
        let mut links = Vec::new();
        for entry in self
            .db
            .iterator_cf(id_cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(link) = self.load(&key[prefix.len()..])? {
                links.push(link);
            }
        }
        Ok(links)
    }

    fn get_all_links(&self) -> Result<Vec<Link>> {
        let links_cf = cf(&self.db, CF_LINKS)?;
        let mut links = Vec::new();
        for entry in self.db.iterator_cf(links_cf, IteratorMode::Start) {
            let (_, value) = entry?;
            links.push(bincode::deserialize(&value)?);
        }
        Ok(links)
    }

    fn get_changes_page(
        &self,
        since: Option<i64>,
        before: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<Link>> {
        let Some((lower, upper)) = time_range(since, before) else {
            return Ok(Vec::new());
        };
        let time_cf = cf(&self.db, CF_BY_TIME)?;
        let start = encode_timestamp(upper);
        let mode = if before.is_some() {
            IteratorMode::From(&start, Direction::Reverse)
        } else {
            IteratorMode::End
        };

        let mut out = Vec::new();
        for entry in self.db.iterator_cf(time_cf, mode) {
            if out.len() >= page_size {
                break;
            }
            let (key, _) = entry?;
            let timestamp = decode_timestamp(&key)?;
            if timestamp >= upper {
                continue;
            }
            if timestamp < lower {
                break;
            }
            if let Some(link) = self.load(&key[8..])? {
                out.push(link);
            }
        }
        Ok(out)
    }

    fn commit(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock();
        for name in [CF_LINKS, CF_BY_TIME, CF_BY_ID] {
            clear_cf(&self.db, name)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn encode_pair(id1: &str, id2: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id1.len() + id2.len());
    push_len_prefixed(&mut key, id1);
    push_len_prefixed(&mut key, id2);
    key
}

/// Big-endian with the sign bit flipped so byte order matches numeric order.
fn encode_timestamp(timestamp: i64) -> [u8; 8] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_timestamp(key: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = key
        .get(..8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| Error::codec("time index key is too short"))?;
    Ok((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

fn time_key(timestamp: i64, pair: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + pair.len());
    key.extend_from_slice(&encode_timestamp(timestamp));
    key.extend_from_slice(pair);
    key
}

fn id_prefix(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + id.len());
    push_len_prefixed(&mut key, id);
    key
}

fn id_key(id: &str, pair: &[u8]) -> Vec<u8> {
    let mut key = id_prefix(id);
    key.extend_from_slice(pair);
    key
}
