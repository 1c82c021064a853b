//! Linkage between two sources: group 1 is indexed, group 2 is matched
//! against it without being indexed itself.

use std::sync::Arc;
use unilink_rs::comparator::Exact;
use unilink_rs::test_support::CountingListener;
use unilink_rs::{
    Database, InMemoryLinkStore, InMemoryStore, LinkKind, LinkStore, LinkStoreListener, Processor,
    Property, Record, Schema, Thresholds, TokenDatabase,
};

fn schema() -> anyhow::Result<Arc<Schema>> {
    Ok(Schema::new(vec![
        Property::identity("ID"),
        Property::new("NAME", Arc::new(Exact), 0.3, 0.8),
        Property::new("EMAIL", Arc::new(Exact), 0.3, 0.8),
    ])?)
}

fn record(id: &str, name: &str, email: &str) -> Record {
    Record::from_pairs([("ID", id), ("NAME", name), ("EMAIL", email)])
}

type Linking = (Processor, Arc<InMemoryLinkStore>, Arc<CountingListener>);

fn linking_processor() -> anyhow::Result<Linking> {
    let schema = schema()?;
    let links = Arc::new(InMemoryLinkStore::new());
    let counts = Arc::new(CountingListener::default());
    let database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new());
    let mut processor = Processor::new(Arc::clone(&schema), Box::new(database))
        .with_thresholds(Thresholds::new(0.85, 0.0));
    processor.add_listener(counts.clone());
    processor.add_listener(Arc::new(LinkStoreListener::new(
        schema,
        links.clone() as Arc<dyn LinkStore>,
    )));
    Ok((processor, links, counts))
}

#[test]
fn identical_records_from_two_sources_make_one_link() -> anyhow::Result<()> {
    let (mut processor, links, counts) = linking_processor()?;
    processor.link(
        &[record("1", "aaaaa", "bbbbb")],
        &[record("2", "aaaaa", "bbbbb")],
    )?;

    // only the group 2 record is matched, so the pair is reported once
    assert_eq!(counts.matches(), 1);
    let all = links.get_all_links()?;
    assert_eq!(all.len(), 1);
    assert_eq!((all[0].id1(), all[0].id2()), ("1", "2"));
    assert_eq!(all[0].kind(), LinkKind::Same);
    assert!(all[0].confidence() > 0.85);
    Ok(())
}

#[test]
fn only_cross_group_pairs_are_linked() -> anyhow::Result<()> {
    let (mut processor, links, counts) = linking_processor()?;
    let group1 = [
        record("1", "aaaaa", "bbbbb"),
        record("3", "aaaaa", "bbbbb"),
        record("5", "ccccc", "ddddd"),
    ];
    let group2 = [record("2", "aaaaa", "bbbbb"), record("4", "aaaaa", "bbbbb")];
    processor.link(&group1, &group2)?;

    assert_eq!(counts.matches(), 4);
    let mut pairs: Vec<(String, String)> = links
        .get_all_links()?
        .iter()
        .map(|l| (l.id1().to_string(), l.id2().to_string()))
        .collect();
    pairs.sort();
    let expected: Vec<(String, String)> = [("1", "2"), ("1", "4"), ("2", "3"), ("3", "4")]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    // no link inside group 1 (1-3) or inside group 2 (2-4)
    assert_eq!(pairs, expected);
    assert!(links.get_all_links_for("5")?.is_empty());

    assert_eq!(processor.stats().records_indexed, 3);
    assert_eq!(processor.stats().records_matched, 2);
    Ok(())
}

#[test]
fn link_records_never_indexes() -> anyhow::Result<()> {
    let (mut processor, _, counts) = linking_processor()?;
    processor.index(&[record("1", "aaaaa", "bbbbb")])?;
    processor.link_records(&[record("2", "aaaaa", "bbbbb")])?;
    processor.link_records(&[record("4", "aaaaa", "bbbbb")])?;

    // 4 never sees 2, only the indexed record
    assert_eq!(counts.matches(), 2);
    assert!(processor.database().find_record_by_id("2")?.is_none());
    Ok(())
}
