//! Override reconciliation and change feeds, checked against both link
//! store implementations.

use std::thread::sleep;
use std::time::Duration;
use tempfile::tempdir;
use unilink_rs::link::now_millis;
use unilink_rs::{InMemoryLinkStore, Link, LinkKind, LinkStatus, LinkStore, PersistentLinkStore};

fn link(a: &str, b: &str, kind: LinkKind, status: LinkStatus, ts: i64) -> Link {
    Link::new(a, b, kind, status, 0.9).with_timestamp(ts)
}

fn pairs(links: &[Link]) -> Vec<(String, String)> {
    links
        .iter()
        .map(|l| (l.id1().to_string(), l.id2().to_string()))
        .collect()
}

fn pair(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

fn incremental_consumer(store: &dyn LinkStore) -> anyhow::Result<()> {
    use LinkKind::*;
    use LinkStatus::*;

    // explicit stamps an hour ahead keep the feed order deterministic
    let base = now_millis() + 3_600_000;
    assert!(store.assert_link(link("a", "b", Same, Inferred, base + 100))?);
    assert!(store.assert_link(link("c", "b", Same, Inferred, base + 200))?);
    assert!(store.assert_link(link("c", "d", MaybeSame, Inferred, base + 300))?);
    store.commit()?;

    let since = store.get_changes_since(base + 150)?;
    assert_eq!(pairs(&since), vec![pair("c", "d"), pair("b", "c")]);

    // a human decision built earlier still beats the engine and never
    // lands behind the link it replaced
    assert!(store.assert_link(link("a", "b", Different, Asserted, base + 50))?);
    assert!(!store.assert_link(link("a", "b", Same, Inferred, base + 500))?);
    let overridden = store.get_changes_between(Some(base + 99), Some(base + 150))?;
    assert_eq!(pairs(&overridden), vec![pair("a", "b")]);
    assert_eq!(overridden[0].kind(), Different);
    assert_eq!(overridden[0].timestamp(), base + 100);

    // bounds are exclusive
    assert!(store.get_changes_between(Some(base + 300), Some(base + 301))?.is_empty());
    assert_eq!(store.get_changes_between(Some(base + 299), Some(base + 301))?.len(), 1);

    let stored = store
        .get_all_links_for("b")?
        .into_iter()
        .find(|l| l.involves("c"))
        .expect("b-c link");
    assert!(store.assert_link(stored.retracted())?);
    let retracted = store.get_changes_between(Some(base + 199), Some(base + 201))?;
    assert_eq!(pairs(&retracted), vec![pair("b", "c")]);
    assert_eq!(retracted[0].status(), Retracted);
    assert_eq!(retracted[0].confidence(), 0.0);

    let page = store.get_changes_page(None, None, 2)?;
    assert_eq!(pairs(&page), vec![pair("c", "d"), pair("b", "c")]);

    assert_eq!(store.get_all_links()?.len(), 3);
    assert_eq!(store.get_all_links_for("b")?.len(), 2);

    store.clear()?;
    assert!(store.get_all_links()?.is_empty());
    assert!(store.get_changes_since(i64::MIN)?.is_empty());
    Ok(())
}

/// A link built before `t1` and stored before `t2` is a change in `(t1, t2)`.
fn stored_between_polls(store: &dyn LinkStore) -> anyhow::Result<()> {
    let pending = Link::new("1", "2", LinkKind::Same, LinkStatus::Inferred, 0.9);
    sleep(Duration::from_millis(5));
    let t1 = now_millis();
    sleep(Duration::from_millis(5));
    assert!(store.assert_link(pending)?);
    sleep(Duration::from_millis(5));
    let t2 = now_millis();

    let changes = store.get_changes_between(Some(t1), Some(t2))?;
    assert_eq!(pairs(&changes), vec![pair("1", "2")]);
    Ok(())
}

#[test]
fn in_memory_change_feed() -> anyhow::Result<()> {
    incremental_consumer(&InMemoryLinkStore::new())?;
    stored_between_polls(&InMemoryLinkStore::new())
}

#[test]
fn persistent_change_feed() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = PersistentLinkStore::open(dir.path().join("links"))?;
    incremental_consumer(&store)?;
    stored_between_polls(&store)?;
    store.close()?;
    Ok(())
}

#[test]
fn asserted_decisions_survive_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("links");
    let stamp;
    {
        let store = PersistentLinkStore::open(&path)?;
        store.assert_link(link("x", "y", LinkKind::Different, LinkStatus::Asserted, 10))?;
        stamp = store.get_all_links_for("x")?[0].timestamp();
        store.close()?;
    }

    let store = PersistentLinkStore::open(&path)?;
    assert!(!store.assert_link(link("x", "y", LinkKind::Same, LinkStatus::Inferred, 20))?);
    let links = store.get_all_links_for("y")?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].status(), LinkStatus::Asserted);
    assert_eq!(links[0].timestamp(), stamp);
    assert!(stamp > 10);
    Ok(())
}
