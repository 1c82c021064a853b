//! Benchmarks for candidate retrieval and pair scoring.
//!
//! These cover the per-record hot path of a deduplication run: token lookup,
//! windowed block retrieval, scoring a pair, and a full in-memory run.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use unilink_rs::comparator::{Comparator, JaroWinkler, Levenshtein};
use unilink_rs::test_support::{generate_dataset, person, person_schema};
use unilink_rs::{
    BlockingDatabase, CompositeKey, Database, InMemoryBlocks, InMemoryStore, KeyTransform,
    Processor, Scorer, TokenDatabase,
};

// =============================================================================
// RETRIEVAL
// =============================================================================

fn bench_token_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_lookup");
    group.sample_size(30);
    group.warm_up_time(Duration::from_millis(500));

    for &count in &[1_000u32, 10_000] {
        let dataset = generate_dataset(count, 0.2, 42);
        let schema = person_schema();
        let mut database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new())
            .with_max_search_hits(100);
        for record in &dataset.records {
            database.index(record).expect("index");
        }
        database.commit().expect("commit");
        let query = person("q", "anna garshol 17", "anna.garshol.17@example.com");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("candidates", count), &count, |b, _| {
            b.iter(|| black_box(database.find_candidate_matches(&query).expect("lookup")))
        });
    }
    group.finish();
}

fn bench_block_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_window");
    group.sample_size(30);

    let dataset = generate_dataset(10_000, 0.2, 42);
    let schema = person_schema();
    let key = CompositeKey::new("name").part("NAME", KeyTransform::FirstLongerThan(2));
    let mut database = BlockingDatabase::new(schema, InMemoryStore::new(), InMemoryBlocks::new())
        .with_key_functions(vec![Arc::new(key)]);
    for record in &dataset.records {
        database.index(record).expect("index");
    }
    database.commit().expect("commit");
    let query = person("q", "greta tanaka", "greta@example.com");

    for &window in &[2usize, 5, 20] {
        database.set_window_size(window);
        group.bench_with_input(BenchmarkId::new("window", window), &window, |b, _| {
            b.iter(|| black_box(database.find_candidate_matches(&query).expect("lookup")))
        });
    }
    group.finish();
}

// =============================================================================
// SCORING
// =============================================================================

fn bench_comparators(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparators");
    let pairs = [
        ("lars marius garshol", "lars marius garshol"),
        ("lars marius garshol", "lars m. garshol"),
        ("anna lindqvist", "hiro tanaka"),
    ];
    group.bench_function("levenshtein", |b| {
        b.iter(|| {
            for (v1, v2) in &pairs {
                black_box(Levenshtein.compare(v1, v2).expect("compare"));
            }
        })
    });
    let jaro = JaroWinkler::default();
    group.bench_function("jaro_winkler", |b| {
        b.iter(|| {
            for (v1, v2) in &pairs {
                black_box(jaro.compare(v1, v2).expect("compare"));
            }
        })
    });
    group.finish();
}

fn bench_scorer(c: &mut Criterion) {
    let scorer = Scorer::new(person_schema());
    let r1 = person("1", "lars marius garshol", "larsga@garshol.priv.no");
    let r2 = person("2", "lars m. garshol", "larsga@garshol.priv.no");
    c.bench_function("scorer_compare", |b| {
        b.iter(|| black_box(scorer.compare(&r1, &r2).expect("score")))
    });
}

// =============================================================================
// END TO END
// =============================================================================

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &count in &[1_000u32, 5_000] {
        let dataset = generate_dataset(count, 0.2, 7);
        group.throughput(Throughput::Elements(dataset.records.len() as u64));
        group.bench_with_input(BenchmarkId::new("token_lookup", count), &dataset, |b, data| {
            b.iter_batched(
                || {
                    let schema = person_schema();
                    let database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new())
                        .with_max_search_hits(50);
                    Processor::new(schema, Box::new(database))
                },
                |mut processor| {
                    processor.deduplicate(&data.records).expect("run");
                    black_box(processor.stats())
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(retrieval, bench_token_lookup, bench_block_window);
criterion_group!(scoring, bench_comparators, bench_scorer);
criterion_group!(end_to_end, bench_deduplicate);
criterion_main!(retrieval, scoring, end_to_end);
