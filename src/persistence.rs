//! # Persistence
//!
//! RocksDB-backed implementations of [`BackingStore`] and [`BlockStore`].
//! Both share one database handle so a single directory holds records, ids,
//! token buckets and block buckets. Writes go straight to RocksDB; `commit`
//! flushes memtables.

use crate::bucket::Bucket;
use crate::config::{DEFAULT_BUCKET_CAPACITY, DEFAULT_CACHE_CAPACITY};
use crate::error::{Error, Result};
use crate::index::{BlockEntry, BlockStore};
use crate::model::{decode_record, encode_record, Record, RecordId};
use crate::store::{token_key, BackingStore};
use lru::LruCache;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const CF_RECORDS: &str = "records";
const CF_IDS: &str = "ids";
const CF_TOKENS: &str = "tokens";
const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_METADATA: &str = "metadata";

const KEY_NEXT_RECORD_ID: &[u8] = b"next_record_id";
const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;
const BLOCK_KEY_SEPARATOR: u8 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct StorageManifest {
    kind: String,
    format_version: u32,
    app_version: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub cache_capacity: usize,
    pub bucket_capacity: usize,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

pub struct PersistentStore {
    db: Arc<DB>,
    cache: Mutex<LruCache<RecordId, Record>>,
    next_record_id: u64,
    bucket_capacity: usize,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        let db = open_db(
            path.as_ref(),
            &[CF_RECORDS, CF_IDS, CF_TOKENS, CF_BLOCKS, CF_METADATA],
        )?;
        validate_or_init_manifest(&db, "backing-store")?;
        let next_record_id = load_metadata::<u64>(&db, KEY_NEXT_RECORD_ID)?.unwrap_or(0);
        let capacity = NonZeroUsize::new(options.cache_capacity)
            .ok_or_else(|| Error::config("record cache capacity must be positive"))?;
        debug!(path = %path.as_ref().display(), next_record_id, "opened backing store");

        Ok(Self {
            db: Arc::new(db),
            cache: Mutex::new(LruCache::new(capacity)),
            next_record_id,
            bucket_capacity: options.bucket_capacity,
        })
    }

    /// A block store living in the same database.
    pub fn block_store(&self) -> PersistentBlocks {
        PersistentBlocks {
            db: Arc::clone(&self.db),
            bucket_capacity: self.bucket_capacity,
        }
    }

    fn load_bucket(&self, key: &[u8]) -> Result<Option<Bucket>> {
        let tokens_cf = cf(&self.db, CF_TOKENS)?;
        match self.db.get_cf(tokens_cf, key)? {
            Some(bytes) => Ok(Some(Bucket::decode(&bytes, self.bucket_capacity)?)),
            None => Ok(None),
        }
    }
}

impl BackingStore for PersistentStore {
    fn is_in_memory(&self) -> bool {
        false
    }

    fn make_new_record_id(&mut self) -> Result<RecordId> {
        let id = RecordId(self.next_record_id);
        self.next_record_id += 1;
        save_metadata(&self.db, KEY_NEXT_RECORD_ID, &self.next_record_id)?;
        Ok(id)
    }

    fn register_record(&mut self, id: RecordId, record: &Record) -> Result<()> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        self.db
            .put_cf(records_cf, id.0.to_be_bytes(), encode_record(record)?)?;
        self.cache.lock().put(id, record.clone());
        Ok(())
    }

    fn register_id(&mut self, id: RecordId, external_id: &str) -> Result<()> {
        let ids_cf = cf(&self.db, CF_IDS)?;
        self.db
            .put_cf(ids_cf, external_id.as_bytes(), id.0.to_be_bytes())?;
        Ok(())
    }

    fn register_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()> {
        let key = token_key(property, token);
        let mut bucket = self
            .load_bucket(key.as_bytes())?
            .unwrap_or_else(|| Bucket::with_capacity_limit(self.bucket_capacity));
        bucket.add(id);
        let tokens_cf = cf(&self.db, CF_TOKENS)?;
        self.db.put_cf(tokens_cf, key.as_bytes(), bucket.encode())?;
        Ok(())
    }

    fn unregister_token(&mut self, id: RecordId, property: &str, token: &str) -> Result<()> {
        let key = token_key(property, token);
        let Some(mut bucket) = self.load_bucket(key.as_bytes())? else {
            return Ok(());
        };
        if bucket.remove(id) {
            let tokens_cf = cf(&self.db, CF_TOKENS)?;
            self.db.put_cf(tokens_cf, key.as_bytes(), bucket.encode())?;
        }
        Ok(())
    }

    fn lookup_internal_id(&self, external_id: &str) -> Result<Option<RecordId>> {
        let ids_cf = cf(&self.db, CF_IDS)?;
        match self.db.get_cf(ids_cf, external_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_record(&self, id: RecordId) -> Result<Option<Cow<'_, Record>>> {
        if let Some(record) = self.cache.lock().get(&id) {
            return Ok(Some(Cow::Owned(record.clone())));
        }
        let records_cf = cf(&self.db, CF_RECORDS)?;
        let Some(bytes) = self.db.get_cf(records_cf, id.0.to_be_bytes())? else {
            return Ok(None);
        };
        let record = decode_record(&bytes)?;
        self.cache.lock().put(id, record.clone());
        Ok(Some(Cow::Owned(record)))
    }

    fn lookup_token(&self, property: &str, token: &str) -> Result<Option<Cow<'_, Bucket>>> {
        Ok(self
            .load_bucket(token_key(property, token).as_bytes())?
            .map(Cow::Owned))
    }

    fn commit(&mut self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.db.flush()?;
        self.cache.lock().clear();
        Ok(())
    }
}

/// Block buckets in the `blocks` column family, keyed by
/// `function NUL key` so each key function owns a contiguous ordered range.
pub struct PersistentBlocks {
    db: Arc<DB>,
    bucket_capacity: usize,
}

impl PersistentBlocks {
    fn entry_at(
        &self,
        function: &str,
        key: &str,
        direction: Direction,
        skip_exact: bool,
    ) -> Result<Option<BlockEntry<'_>>> {
        let blocks_cf = cf(&self.db, CF_BLOCKS)?;
        let prefix = block_prefix(function);
        let target = block_key(function, key);
        let iter = self
            .db
            .iterator_cf(blocks_cf, IteratorMode::From(&target, direction));
        for entry in iter {
            let (raw_key, value) = entry?;
            if !raw_key.starts_with(&prefix) {
                return Ok(None);
            }
            if skip_exact && raw_key.as_ref() == target.as_slice() {
                continue;
            }
            let found = std::str::from_utf8(&raw_key[prefix.len()..])
                .map_err(|err| Error::codec(err.to_string()))?
                .to_string();
            let bucket = Bucket::decode(&value, self.bucket_capacity)?;
            return Ok(Some((found, Cow::Owned(bucket))));
        }
        Ok(None)
    }

    fn load(&self, raw_key: &[u8]) -> Result<Option<Bucket>> {
        let blocks_cf = cf(&self.db, CF_BLOCKS)?;
        match self.db.get_cf(blocks_cf, raw_key)? {
            Some(bytes) => Ok(Some(Bucket::decode(&bytes, self.bucket_capacity)?)),
            None => Ok(None),
        }
    }
}

impl BlockStore for PersistentBlocks {
    fn add(&mut self, function: &str, key: &str, id: RecordId) -> Result<()> {
        let raw_key = block_key(function, key);
        let mut bucket = self
            .load(&raw_key)?
            .unwrap_or_else(|| Bucket::with_capacity_limit(self.bucket_capacity));
        bucket.add(id);
        let blocks_cf = cf(&self.db, CF_BLOCKS)?;
        self.db.put_cf(blocks_cf, raw_key, bucket.encode())?;
        Ok(())
    }

    fn remove(&mut self, function: &str, key: &str, id: RecordId) -> Result<bool> {
        let raw_key = block_key(function, key);
        let Some(mut bucket) = self.load(&raw_key)? else {
            return Ok(false);
        };
        if !bucket.remove(id) {
            return Ok(false);
        }
        let blocks_cf = cf(&self.db, CF_BLOCKS)?;
        if bucket.is_empty() {
            self.db.delete_cf(blocks_cf, raw_key)?;
        } else {
            self.db.put_cf(blocks_cf, raw_key, bucket.encode())?;
        }
        Ok(true)
    }

    fn ceiling(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        self.entry_at(function, key, Direction::Forward, false)
    }

    fn lower(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        self.entry_at(function, key, Direction::Reverse, true)
    }

    fn higher(&self, function: &str, key: &str) -> Result<Option<BlockEntry<'_>>> {
        self.entry_at(function, key, Direction::Forward, true)
    }

    fn commit(&mut self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn block_prefix(function: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(function.len() + 1);
    prefix.extend_from_slice(function.as_bytes());
    prefix.push(BLOCK_KEY_SEPARATOR);
    prefix
}

fn block_key(function: &str, key: &str) -> Vec<u8> {
    let mut raw = block_prefix(function);
    raw.extend_from_slice(key.as_bytes());
    raw
}

fn decode_id(bytes: &[u8]) -> Result<RecordId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::codec(format!("record id has {} bytes", bytes.len())))?;
    Ok(RecordId(u64::from_be_bytes(raw)))
}

pub(crate) fn open_db(path: &Path, families: &[&str]) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = families
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
    DB::open_cf_descriptors(&options, path, cfs).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| Error::config(format!("missing column family {name}")))
}

pub(crate) fn validate_or_init_manifest(db: &DB, kind: &str) -> Result<()> {
    let metadata_cf = cf(db, CF_METADATA)?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.kind != kind {
            return Err(Error::config(format!(
                "directory holds a {}, expected a {kind}",
                manifest.kind
            )));
        }
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(Error::config(format!(
                "storage format version mismatch: expected {}, found {}",
                STORAGE_FORMAT_VERSION, manifest.format_version
            )));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        kind: kind.to_string(),
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    db.put_cf(metadata_cf, KEY_MANIFEST, bincode::serialize(&manifest)?)?;
    Ok(())
}

pub(crate) fn load_metadata<T: DeserializeOwned>(db: &DB, key: &[u8]) -> Result<Option<T>> {
    let metadata_cf = cf(db, CF_METADATA)?;
    match db.get_cf(metadata_cf, key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn save_metadata<T: Serialize>(db: &DB, key: &[u8], value: &T) -> Result<()> {
    let metadata_cf = cf(db, CF_METADATA)?;
    db.put_cf(metadata_cf, key, bincode::serialize(value)?)?;
    Ok(())
}

/// Delete every row of a column family in one batch.
pub(crate) fn clear_cf(db: &DB, name: &str) -> Result<()> {
    let handle = cf(db, name)?;
    let mut batch = WriteBatch::default();
    for entry in db.iterator_cf(handle, IteratorMode::Start) {
        let (key, _) = entry?;
        batch.delete_cf(handle, key);
    }
    db.write(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::collect_window;
    use rustc_hash::FxHashSet;
    use tempfile::tempdir;

    #[test]
    fn records_and_ids_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path()).unwrap();
        let id = store.make_new_record_id().unwrap();
        let record = Record::from_pairs([("ID", "a-1"), ("NAME", "Ada")]);
        store.register_record(id, &record).unwrap();
        store.register_id(id, "a-1").unwrap();

        assert_eq!(store.lookup_internal_id("a-1").unwrap(), Some(id));
        assert_eq!(
            store.find_record(id).unwrap().map(Cow::into_owned),
            Some(record)
        );
        assert!(!store.is_in_memory());
    }

    #[test]
    fn token_buckets_persist_membership() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path()).unwrap();
        store.register_token(RecordId(3), "NAME", "ada").unwrap();
        store.register_token(RecordId(1), "NAME", "ada").unwrap();
        store.unregister_token(RecordId(3), "NAME", "ada").unwrap();

        let bucket = store.lookup_token("NAME", "ada").unwrap().unwrap();
        assert_eq!(bucket.ids(), &[RecordId(1)]);
    }

    #[test]
    fn block_navigation_stays_inside_one_function() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        let mut blocks = store.block_store();
        blocks.add("a", "m", RecordId(1)).unwrap();
        blocks.add("b", "a", RecordId(2)).unwrap();
        blocks.add("b", "c", RecordId(3)).unwrap();

        assert!(blocks.higher("a", "m").unwrap().is_none());
        assert!(blocks.lower("b", "a").unwrap().is_none());
        assert_eq!(blocks.ceiling("b", "b").unwrap().unwrap().0, "c");
        assert_eq!(blocks.lower("b", "c").unwrap().unwrap().0, "a");
        assert!(blocks.ceiling("a", "n").unwrap().is_none());

        let mut out = FxHashSet::default();
        collect_window(&blocks, "b", "b", 5, &mut out).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn second_open_of_same_directory_fails() {
        let dir = tempdir().unwrap();
        let _first = PersistentStore::open(dir.path()).unwrap();
        let err = PersistentStore::open(dir.path()).err().unwrap();
        assert!(matches!(err, Error::Open { .. }));
    }
}
