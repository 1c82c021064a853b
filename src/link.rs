//! # Links
//!
//! A link records a decision about an unordered pair of external ids.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Same,
    MaybeSame,
    Different,
}

impl LinkKind {
    pub fn id(self) -> u8 {
        match self {
            LinkKind::Same => 1,
            LinkKind::MaybeSame => 2,
            LinkKind::Different => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(LinkKind::Same),
            2 => Some(LinkKind::MaybeSame),
            3 => Some(LinkKind::Different),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Stated by a human or an authoritative source.
    Asserted,
    /// Derived by the engine.
    Inferred,
    /// Previously inferred, no longer supported by evidence.
    Retracted,
}

impl LinkStatus {
    pub fn id(self) -> u8 {
        match self {
            LinkStatus::Asserted => 2,
            LinkStatus::Inferred => 1,
            LinkStatus::Retracted => 0,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(LinkStatus::Asserted),
            1 => Some(LinkStatus::Inferred),
            0 => Some(LinkStatus::Retracted),
            _ => None,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    id1: String,
    id2: String,
    kind: LinkKind,
    status: LinkStatus,
    confidence: f64,
    timestamp: i64,
}

impl Link {
    /// A link stamped with the current time. The ids are stored in
    /// lexicographic order.
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        kind: LinkKind,
        status: LinkStatus,
        confidence: f64,
    ) -> Self {
        let (a, b) = (a.into(), b.into());
        let (id1, id2) = if a <= b { (a, b) } else { (b, a) };
        Self {
            id1,
            id2,
            kind,
            status,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: now_millis(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id1(&self) -> &str {
        &self.id1
    }

    pub fn id2(&self) -> &str {
        &self.id2
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn involves(&self, id: &str) -> bool {
        self.id1 == id || self.id2 == id
    }

    /// The id on the other end of the link from `id`.
    pub fn other_id(&self, id: &str) -> &str {
        if self.id1 == id {
            &self.id2
        } else {
            &self.id1
        }
    }

    pub fn same_pair(&self, other: &Link) -> bool {
        self.id1 == other.id1 && self.id2 == other.id2
    }

    /// True if storing `self` should replace `other`. Asserted links beat
    /// everything else; otherwise the newer link wins.
    pub fn overrides(&self, other: &Link) -> bool {
        match (self.status, other.status) {
            (LinkStatus::Asserted, s) if s != LinkStatus::Asserted => true,
            (s, LinkStatus::Asserted) if s != LinkStatus::Asserted => false,
            _ => self.timestamp >= other.timestamp,
        }
    }

    /// Same status, kind and confidence.
    pub fn same_decision(&self, other: &Link) -> bool {
        self.status == other.status
            && self.kind == other.kind
            && self.confidence == other.confidence
    }

    /// A retraction of this link, stamped now.
    pub fn retracted(&self) -> Link {
        Link {
            id1: self.id1.clone(),
            id2: self.id2.clone(),
            kind: self.kind,
            status: LinkStatus::Retracted,
            confidence: 0.0,
            timestamp: now_millis().max(self.timestamp),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {:?} {} ({:?}, {:.3}) @{}]",
            self.id1, self.kind, self.id2, self.status, self.confidence, self.timestamp
        )
    }
}
