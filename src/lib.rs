//! # Unilink
//!
//! A record deduplication and linkage engine.
//!
//! Records are indexed into a backing store, candidates are retrieved either
//! by windowed blocking over key functions or by token lookup, and each
//! candidate pair is scored with a naive Bayes combination of per-property
//! probabilities. A linkage strategy turns scores into decisions, and
//! listeners turn decisions into links, equivalence classes or logs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use unilink_rs::comparator::Levenshtein;
//! use unilink_rs::{InMemoryStore, Processor, Property, Record, Schema, TokenDatabase};
//!
//! # fn main() -> unilink_rs::Result<()> {
//! let schema = Schema::new(vec![
//!     Property::identity("ID"),
//!     Property::new("NAME", Arc::new(Levenshtein), 0.3, 0.9),
//! ])?;
//! let database = TokenDatabase::new(Arc::clone(&schema), InMemoryStore::new());
//! let mut processor = Processor::new(schema, Box::new(database));
//! processor.deduplicate(&[
//!     Record::from_pairs([("ID", "1"), ("NAME", "lars marius garshol")]),
//!     Record::from_pairs([("ID", "2"), ("NAME", "lars marius garshol")]),
//! ])?;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod classes;
pub mod comparator;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod link;
pub mod link_store;
pub mod listener;
pub mod model;
pub mod persistence;
pub mod processor;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod strategy;

#[doc(hidden)]
pub mod test_support;

// Re-export main types for convenience
pub use bucket::Bucket;
pub use classes::EquivalenceClasses;
pub use comparator::Comparator;
pub use config::{ConfigOverrides, UnilinkConfig};
pub use database::{BlockingDatabase, Database, TokenDatabase};
pub use error::{Error, Result};
pub use index::{BlockStore, CompositeKey, InMemoryBlocks, KeyFunction, KeyTransform};
pub use link::{Link, LinkKind, LinkStatus};
pub use link_store::{InMemoryLinkStore, LinkStore, PersistentLinkStore};
pub use listener::{ClassListener, LinkStoreListener, LoggingListener, MatchListener};
pub use model::{Record, RecordId};
pub use persistence::{PersistentBlocks, PersistentStore};
pub use processor::{Processor, ProcessorStats};
pub use schema::{Lookup, Property, Schema};
pub use scoring::{ProbabilityCurve, Scorer};
pub use store::{BackingStore, InMemoryStore};
pub use strategy::{LinkageStrategy, Thresholds};
