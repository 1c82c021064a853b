//! # Error Taxonomy
//!
//! Configuration and open errors are fatal and surface before any indexing.
//! Capability errors belong to a single record or pair; the processor logs
//! them and moves on. Bucket overflow is deliberately absent: it is a recall
//! trade-off, not a failure.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid schema, invalid runtime settings or an incompatible on-disk format.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A backing store or link store could not be opened.
    #[error("cannot open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },

    /// A comparator or key function rejected its input.
    #[error("{component} cannot handle input: {reason}")]
    Capability { component: String, reason: String },

    /// Persisted bytes that do not decode.
    #[error("malformed persisted data: {reason}")]
    Codec { reason: String },

    #[error(transparent)]
    Storage(#[from] rocksdb::Error),

    #[error(transparent)]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Figment(#[from] figment::Error),
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    pub fn capability(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Capability {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn codec(reason: impl Into<String>) -> Self {
        Error::Codec {
            reason: reason.into(),
        }
    }

    /// Capability errors only invalidate the record or pair at hand.
    pub fn is_capability(&self) -> bool {
        matches!(self, Error::Capability { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_are_not_fatal() {
        let err = Error::capability("numeric", "'abc' is not a number");
        assert!(err.is_capability());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "numeric cannot handle input: 'abc' is not a number");
    }

    #[test]
    fn config_errors_are_fatal() {
        let err = Error::config("threshold must be in [0, 1]");
        assert!(err.is_fatal());
        assert!(!err.is_capability());
    }
}
