//! Default constants for unilink configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Matching Defaults
// =============================================================================

/// Probability above which a pair is a match.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Probability above which a pair is a possible match. Zero disables the tier.
pub const DEFAULT_MAYBE_THRESHOLD: f64 = 0.0;

/// Number of records handed to listeners per batch.
pub const DEFAULT_BATCH_SIZE: usize = 40_000;

/// Default number of matching threads.
/// Uses the number of CPU cores.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

// =============================================================================
// Blocking Defaults
// =============================================================================

/// Neighbouring index entries visited on each side of a blocking key.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Maximum ids held by one bucket before it overflows.
/// Keys shared by more records than this stop producing candidates.
pub const DEFAULT_BUCKET_CAPACITY: usize = 1_000_000;

/// Candidate cap for token lookup.
pub const DEFAULT_MAX_SEARCH_HITS: usize = 1_000_000;

/// Minimum relevance score for token lookup candidates.
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.0;

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Records kept in the persistent store's LRU cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;
