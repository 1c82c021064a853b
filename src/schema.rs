//! # Schema
//!
//! Immutable property configuration shared by every component of a run.

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::model::Record;
use hashbrown::HashSet;
use std::fmt;
use std::sync::Arc;

/// How a property participates in candidate lookup and pair exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    /// A pair where either side lacks the property is never a match.
    Required,
    #[default]
    Optional,
    /// Never used to find candidates.
    Disabled,
}

#[derive(Clone)]
pub struct Property {
    name: String,
    identity: bool,
    lookup: Lookup,
    comparator: Option<Arc<dyn Comparator>>,
    low: f64,
    high: f64,
    ignore: bool,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("lookup", &self.lookup)
            .field("comparator", &self.comparator.as_ref().map(|c| c.name().to_string()))
            .field("low", &self.low)
            .field("high", &self.high)
            .field("ignore", &self.ignore)
            .finish()
    }
}

impl Property {
    /// An identity property supplies external ids and is never scored.
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: true,
            lookup: Lookup::Disabled,
            comparator: None,
            low: 0.0,
            high: 0.0,
            ignore: false,
        }
    }

    pub fn new(
        name: impl Into<String>,
        comparator: Arc<dyn Comparator>,
        low: f64,
        high: f64,
    ) -> Self {
        Self {
            name: name.into(),
            identity: false,
            lookup: Lookup::Optional,
            comparator: Some(comparator),
            low,
            high,
            ignore: false,
        }
    }

    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn lookup(&self) -> Lookup {
        self.lookup
    }

    pub fn comparator(&self) -> Option<&dyn Comparator> {
        self.comparator.as_deref()
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Ignored properties are kept in records but never scored. A `high`
    /// weight of zero means the same thing.
    pub fn is_ignored(&self) -> bool {
        self.ignore || (!self.identity && self.high == 0.0)
    }

    /// True when the scorer should look at this property at all.
    pub fn is_scored(&self) -> bool {
        !self.identity && !self.is_ignored() && self.comparator.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    properties: Vec<Property>,
}

impl Schema {
    /// Validate and freeze a property list.
    pub fn new(properties: Vec<Property>) -> Result<Arc<Self>> {
        if !properties.iter().any(Property::is_identity) {
            return Err(Error::config("schema has no identity property"));
        }

        let mut seen = HashSet::new();
        for property in &properties {
            if property.name.is_empty() {
                return Err(Error::config("property name must not be empty"));
            }
            if !seen.insert(property.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate property '{}'",
                    property.name
                )));
            }
            if property.identity {
                continue;
            }
            for (label, weight) in [("low", property.low), ("high", property.high)] {
                if !(0.0..=1.0).contains(&weight) {
                    return Err(Error::config(format!(
                        "property '{}': {label} weight {weight} is outside [0, 1]",
                        property.name
                    )));
                }
            }
            if property.low > property.high {
                return Err(Error::config(format!(
                    "property '{}': low {} exceeds high {}",
                    property.name, property.low, property.high
                )));
            }
        }
        drop(seen);

        Ok(Arc::new(Self { properties }))
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn identity_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.identity)
    }

    /// Properties that feed token lookup, in declaration order.
    pub fn lookup_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties
            .iter()
            .filter(|p| p.is_scored() && p.lookup != Lookup::Disabled)
    }

    pub fn scored_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_scored())
    }

    /// Every identity value of a record.
    pub fn external_ids<'r>(&self, record: &'r Record) -> Vec<&'r str> {
        self.identity_properties()
            .flat_map(|property| record.values(property.name()))
            .map(String::as_str)
            .collect()
    }

    /// The primary external id: the first identity value.
    pub fn external_id<'r>(&self, record: &'r Record) -> Option<&'r str> {
        self.identity_properties()
            .find_map(|property| record.value(property.name()))
    }
}
