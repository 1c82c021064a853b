//! # Bucket
//!
//! Capacity-bounded membership set for one blocking key or lookup token.
//!
//! A bucket is an explicit state machine. While `Live` it owns a growable
//! slot arena whose capacity starts small and doubles up to the configured
//! maximum. The first add that would exceed the maximum moves it to
//! `Overflowed`: every stored id is discarded and nothing is ever accepted
//! again. Pathologically frequent keys therefore cost no memory, at the price
//! of recall for that key alone.

pub use crate::config::DEFAULT_BUCKET_CAPACITY;
use crate::error::{Error, Result};
use crate::model::{ByteReader, RecordId};

const INITIAL_SLOTS: usize = 10;
const OVERFLOWED_COUNT: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum BucketState {
    Live { slots: Box<[RecordId]>, len: usize },
    Overflowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    state: BucketState,
    max: usize,
    /// True iff the live prefix was mutated since the last sort.
    dirty: bool,
}

impl Bucket {
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_BUCKET_CAPACITY)
    }

    pub fn with_capacity_limit(max: usize) -> Self {
        let max = max.max(1);
        Self {
            state: BucketState::Live {
                slots: vec![RecordId(0); INITIAL_SLOTS.min(max)].into_boxed_slice(),
                len: 0,
            },
            max,
            dirty: false,
        }
    }

    pub fn add(&mut self, id: RecordId) {
        let BucketState::Live { slots, len } = &mut self.state else {
            return;
        };
        if *len >= slots.len() {
            if *len >= self.max {
                self.state = BucketState::Overflowed;
                self.dirty = false;
                return;
            }
            let grown = (slots.len() * 2).min(self.max);
            let mut next = vec![RecordId(0); grown].into_boxed_slice();
            next[..*len].copy_from_slice(&slots[..*len]);
            *slots = next;
        }
        slots[*len] = id;
        *len += 1;
        self.dirty = true;
    }

    /// Remove one occurrence of `id` by moving the last live id into its slot.
    /// Returns false if the id was not present.
    pub fn remove(&mut self, id: RecordId) -> bool {
        let BucketState::Live { slots, len } = &mut self.state else {
            return false;
        };
        let Some(pos) = slots[..*len].iter().position(|candidate| *candidate == id) else {
            return false;
        };
        *len -= 1;
        slots[pos] = slots[*len];
        self.dirty = true;
        true
    }

    pub fn sort(&mut self) {
        if !self.dirty {
            return;
        }
        if let BucketState::Live { slots, len } = &mut self.state {
            slots[..*len].sort_unstable();
        }
        self.dirty = false;
    }

    /// Binary search over the live prefix. Only reliable after [`Bucket::sort`]
    /// has been called since the last mutation.
    pub fn contains(&self, id: RecordId) -> bool {
        self.ids().binary_search(&id).is_ok()
    }

    /// Live ids, in insertion order unless sorted since.
    pub fn ids(&self) -> &[RecordId] {
        match &self.state {
            BucketState::Live { slots, len } => &slots[..*len],
            BucketState::Overflowed => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn is_overflowed(&self) -> bool {
        matches!(self.state, BucketState::Overflowed)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current slot arena size; zero once overflowed.
    pub fn slot_capacity(&self) -> usize {
        match &self.state {
            BucketState::Live { slots, .. } => slots.len(),
            BucketState::Overflowed => 0,
        }
    }

    /// Selectivity score: rarer buckets score higher. Empty buckets score the
    /// same as singletons, the maximum.
    pub fn score(&self) -> f64 {
        let size = self.len().max(1) as f64;
        1.0 / (size + 1.0).ln()
    }

    /// Big-endian `i32` count followed by that many `i64` ids in stored order.
    /// Overflowed buckets are written with a count of -1.
    pub fn encode(&self) -> Vec<u8> {
        let ids = self.ids();
        let mut buf = Vec::with_capacity(4 + ids.len() * 8);
        if self.is_overflowed() {
            buf.extend_from_slice(&OVERFLOWED_COUNT.to_be_bytes());
            return buf;
        }
        buf.extend_from_slice(&(ids.len() as i32).to_be_bytes());
        for id in ids {
            buf.extend_from_slice(&(id.0 as i64).to_be_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8], max: usize) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let count = reader.read_i32()?;
        if count == OVERFLOWED_COUNT {
            return Ok(Self {
                state: BucketState::Overflowed,
                max: max.max(1),
                dirty: false,
            });
        }
        let count = usize::try_from(count)
            .map_err(|_| Error::codec(format!("invalid bucket count {count}")))?;
        let available = bytes.len().saturating_sub(4) / 8;
        if count > available {
            return Err(Error::codec(format!(
                "bucket count {count} exceeds the {available} ids present"
            )));
        }
        let mut ids = Vec::with_capacity(count.max(INITIAL_SLOTS));
        for _ in 0..count {
            ids.push(RecordId(reader.read_i64()? as u64));
        }
        ids.resize(INITIAL_SLOTS.min(max.max(1)).max(count), RecordId(0));
        Ok(Self {
            state: BucketState::Live {
                slots: ids.into_boxed_slice(),
                len: count,
            },
            max: max.max(1),
            dirty: count > 1,
        })
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for Bucket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.len().cmp(&other.len()))
    }
}
