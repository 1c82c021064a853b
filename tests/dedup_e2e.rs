//! End-to-end deduplication runs over in-memory storage.
//!
//! These tests drive the processor through both retrieval schemes and check
//! what listeners and the link store observe.

use std::sync::Arc;
use unilink_rs::index::FnKey;
use unilink_rs::test_support::{generate_dataset, person, person_schema, CountingListener};
use unilink_rs::{
    BlockingDatabase, ClassListener, CompositeKey, Database, EquivalenceClasses, InMemoryBlocks,
    InMemoryLinkStore, InMemoryStore, KeyTransform, LinkKind, LinkStatus, LinkStore,
    LinkStoreListener, LinkageStrategy, LoggingListener, Processor, Thresholds, TokenDatabase,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every record lands in the same block, so every pair is compared.
fn single_block_processor(
    strategy: LinkageStrategy,
    maybe: f64,
) -> (Processor, Arc<CountingListener>) {
    let schema = person_schema();
    let everything = FnKey::new("everything", |_| Ok("all".to_string()));
    let database = BlockingDatabase::new(
        Arc::clone(&schema),
        InMemoryStore::new(),
        InMemoryBlocks::new(),
    )
    .with_key_functions(vec![Arc::new(everything)]);
    let listener = Arc::new(CountingListener::default());
    let mut processor = Processor::new(schema, Box::new(database))
        .with_strategy(strategy)
        .with_thresholds(Thresholds::new(0.85, maybe));
    processor.add_listener(listener.clone());
    (processor, listener)
}

#[test]
fn identical_records_make_one_link() -> anyhow::Result<()> {
    let schema = person_schema();
    let links = Arc::new(InMemoryLinkStore::new());
    let listener = Arc::new(CountingListener::default());

    let database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new());
    let mut processor = Processor::new(Arc::clone(&schema), Box::new(database));
    processor.add_listener(listener.clone());
    processor.add_listener(Arc::new(LinkStoreListener::new(
        schema,
        links.clone() as Arc<dyn LinkStore>,
    )));

    processor.deduplicate(&[
        person("1", "aaaaa", "a@x"),
        person("2", "aaaaa", "a@x"),
        person("3", "bbbbb", "b@y"),
    ])?;

    // each side of the pair reports the match, the store keeps one link
    assert_eq!(listener.matches(), 2);
    assert_eq!(listener.no_matches(), 1);

    let all = links.get_all_links()?;
    assert_eq!(all.len(), 1);
    let link = &all[0];
    assert_eq!((link.id1(), link.id2()), ("1", "2"));
    assert_eq!(link.kind(), LinkKind::Same);
    assert_eq!(link.status(), LinkStatus::Inferred);
    assert!(links.get_all_links_for("3")?.is_empty());
    Ok(())
}

#[test]
fn simple_reports_every_match_best_only_one() -> anyhow::Result<()> {
    let records = [
        person("1", "aaaaa", "a@x"),
        person("2", "aaaaa", "a@x"),
        person("3", "aaaaa", "a@x"),
    ];

    let (mut simple, simple_listener) = single_block_processor(LinkageStrategy::Simple, 0.0);
    simple.deduplicate(&records)?;
    assert_eq!(simple_listener.matches(), 6);

    let (mut best, best_listener) = single_block_processor(LinkageStrategy::Best, 0.0);
    best.deduplicate(&records)?;
    assert_eq!(best_listener.matches(), 3);
    Ok(())
}

#[test]
fn mix_reports_best_match_and_possible_tier() -> anyhow::Result<()> {
    let records = [
        person("1", "aaaaa", "a@x"),
        person("2", "aaaaa", "a@x"),
        // one edit away on the name, different email
        person("3", "aaaab", "b@x"),
    ];

    let (mut mix, mix_listener) = single_block_processor(LinkageStrategy::Mix, 0.5);
    mix.deduplicate(&records)?;
    assert_eq!(mix_listener.matches(), 2);
    assert_eq!(mix_listener.maybes(), 4);
    assert_eq!(mix_listener.no_matches(), 0);

    let (mut best, best_listener) = single_block_processor(LinkageStrategy::Best, 0.5);
    best.deduplicate(&records)?;
    assert_eq!(best_listener.matches(), 2);
    assert_eq!(best_listener.maybes(), 1);
    Ok(())
}

#[test]
fn overwrite_controls_reindexing() -> anyhow::Result<()> {
    let (mut processor, _) = single_block_processor(LinkageStrategy::Simple, 0.0);
    processor.index(&[person("1", "aaaaa", "a@x")])?;
    processor.index(&[person("1", "zzzzz", "z@x")])?;
    let stored = processor.database().find_record_by_id("1")?.expect("record 1");
    assert_eq!(stored.value("NAME"), Some("zzzzz"));

    let schema = person_schema();
    let mut database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new());
    database.set_overwrite(false);
    let mut processor = Processor::new(schema, Box::new(database));
    processor.index(&[person("1", "aaaaa", "a@x")])?;
    processor.index(&[person("1", "zzzzz", "z@x")])?;
    let stored = processor.database().find_record_by_id("1")?.expect("record 1");
    assert_eq!(stored.value("NAME"), Some("aaaaa"));
    Ok(())
}

#[test]
fn overwritten_record_leaves_its_old_block() -> anyhow::Result<()> {
    let schema = person_schema();
    let by_name = CompositeKey::new("name").part("NAME", KeyTransform::Value);
    let mut database =
        BlockingDatabase::new(schema, InMemoryStore::new(), InMemoryBlocks::new())
            .with_key_functions(vec![Arc::new(by_name)]);
    database.index(&person("1", "aaaaa", "a@x"))?;
    database.index(&person("1", "zzzzz", "a@x"))?;
    database.commit()?;

    assert_eq!(database.blocks().key_count("name"), 1);
    let candidates = database.find_candidate_matches(&person("2", "aaaaa", "a@x"))?;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].value("NAME"), Some("zzzzz"));
    Ok(())
}

#[test]
fn generated_duplicates_fall_into_classes() -> anyhow::Result<()> {
    init_tracing();
    let dataset = generate_dataset(60, 0.3, 7);
    let schema = person_schema();
    let classes = Arc::new(EquivalenceClasses::new());

    let database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new());
    let mut processor = Processor::new(Arc::clone(&schema), Box::new(database))
        .with_batch_size(25)
        .with_threads(2)?;
    processor.add_listener(Arc::new(ClassListener::new(schema, Arc::clone(&classes))));
    processor.add_listener(Arc::new(LoggingListener));
    processor.deduplicate(&dataset.records)?;

    assert!(!dataset.duplicates.is_empty());
    for (original, duplicate) in &dataset.duplicates {
        assert!(
            classes.same_class(original, duplicate),
            "{original} and {duplicate} should be linked"
        );
    }
    assert_eq!(processor.stats().records_matched, dataset.records.len() as u64);
    Ok(())
}
