//! # Test Support
//!
//! Fixtures shared by unit tests, integration tests and benches: a small
//! person schema, a seeded dataset generator and a counting listener.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::comparator::{Exact, Levenshtein};
use crate::listener::MatchListener;
use crate::model::Record;
use crate::schema::{Lookup, Property, Schema};

pub const ID: &str = "ID";
pub const NAME: &str = "NAME";
pub const EMAIL: &str = "EMAIL";

/// `ID`, a fuzzy `NAME` and an exact `EMAIL`.
///
/// # Panics
///
/// Never in practice: the property list is fixed and valid. A panic here
/// means schema validation rejected it, which is a bug in `Schema::new`.
pub fn person_schema() -> Arc<Schema> {
    let properties = vec![
        Property::identity(ID),
        Property::new(NAME, Arc::new(Levenshtein), 0.3, 0.8),
        Property::new(EMAIL, Arc::new(Exact), 0.4, 0.9).with_lookup(Lookup::Required),
    ];
    match Schema::new(properties) {
        Ok(schema) => schema,
        Err(err) => panic!("person schema is invalid: {err}"),
    }
}

pub fn person(id: &str, name: &str, email: &str) -> Record {
    Record::from_pairs([(ID, id), (NAME, name), (EMAIL, email)])
}

#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub records: Vec<Record>,
    /// `(original, duplicate)` external ids
    pub duplicates: Vec<(String, String)>,
}

/// `count` distinct people, each followed by a near-duplicate with
/// probability `duplicate_probability`. The duplicate keeps the email and has
/// one character of its name replaced.
pub fn generate_dataset(count: u32, duplicate_probability: f64, seed: u64) -> GeneratedDataset {
    const FIRST: [&str; 8] = ["anna", "bjorn", "carla", "dmitri", "elena", "farid", "greta", "hiro"];
    const LAST: [&str; 6] = ["garshol", "lindqvist", "moreau", "okafor", "petrov", "tanaka"];

    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(count as usize);
    let mut duplicates = Vec::new();

    for i in 1..=count {
        let first = FIRST[rng.random_range(0..FIRST.len())];
        let last = LAST[rng.random_range(0..LAST.len())];
        let name = format!("{first} {last} {i}");
        let email = format!("{first}.{last}.{i}@example.com");
        let id = format!("p{i}");
        records.push(person(&id, &name, &email));

        if rng.random_bool(duplicate_probability) {
            let mut typo: Vec<char> = name.chars().collect();
            let at = rng.random_range(0..first.len());
            typo[at] = if typo[at] == 'x' { 'y' } else { 'x' };
            let dup_id = format!("p{i}-dup");
            records.push(person(&dup_id, &typo.into_iter().collect::<String>(), &email));
            duplicates.push((id, dup_id));
        }
    }

    GeneratedDataset { records, duplicates }
}

/// Counts listener events.
#[derive(Debug, Default)]
pub struct CountingListener {
    matches: AtomicUsize,
    maybes: AtomicUsize,
    no_matches: AtomicUsize,
    batches: AtomicUsize,
}

impl CountingListener {
    pub fn matches(&self) -> usize {
        self.matches.load(Ordering::SeqCst)
    }

    pub fn maybes(&self) -> usize {
        self.maybes.load(Ordering::SeqCst)
    }

    pub fn no_matches(&self) -> usize {
        self.no_matches.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl MatchListener for CountingListener {
    fn batch_ready(&self, _size: usize) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }

    fn matches(&self, _r1: &Record, _r2: &Record, _confidence: f64) {
        self.matches.fetch_add(1, Ordering::SeqCst);
    }

    fn matches_perhaps(&self, _r1: &Record, _r2: &Record, _confidence: f64) {
        self.maybes.fetch_add(1, Ordering::SeqCst);
    }

    fn no_match_for(&self, _record: &Record) {
        self.no_matches.fetch_add(1, Ordering::SeqCst);
    }
}
