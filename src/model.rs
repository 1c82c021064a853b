//! # Data Model
//!
//! Records, internal identifiers and the flattened record codec used by the
//! persistent backing store.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dense internal identifier, unique per backing store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// A record: property name to the set of values it carries.
///
/// Values are kept in insertion order but treated as a set; duplicates and
/// empty strings are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(property, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::new();
        for (property, value) in pairs {
            record.add_value(property, value);
        }
        record
    }

    /// Add a value. Empty values are dropped, repeated values ignored.
    pub fn add_value(&mut self, property: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        let values = self.values.entry(property.into()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub fn with_value(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_value(property, value);
        self
    }

    /// All values of a property; empty if the record lacks it.
    pub fn values(&self, property: &str) -> &[String] {
        self.values
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The first value of a property.
    pub fn value(&self, property: &str) -> Option<&str> {
        self.values(property).first().map(String::as_str)
    }

    pub fn has_property(&self, property: &str) -> bool {
        !self.values(property).is_empty()
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Flattened `(property, value)` view in property order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().flat_map(|(property, values)| {
            values
                .iter()
                .map(move |value| (property.as_str(), value.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (ix, (property, values)) in self.values.iter().enumerate() {
            if ix > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=[{}]", property, values.join(", "))?;
        }
        write!(f, "}}")
    }
}

/// Encode a record as a big-endian `i32` string count followed by that many
/// length-prefixed strings: `property, value, property, value, ...`.
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let pairs: Vec<(&str, &str)> = record.pairs().collect();
    let count = i32::try_from(pairs.len() * 2)
        .map_err(|_| Error::codec("record has too many values"))?;
    let mut buf = Vec::with_capacity(4 + pairs.len() * 16);
    buf.extend_from_slice(&count.to_be_bytes());
    for (property, value) in pairs {
        write_utf(&mut buf, property)?;
        write_utf(&mut buf, value)?;
    }
    Ok(buf)
}

/// Decode bytes written by [`encode_record`].
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_i32()?;
    if count < 0 || count % 2 != 0 {
        return Err(Error::codec(format!("invalid record string count {count}")));
    }
    let mut record = Record::new();
    for _ in 0..count / 2 {
        let property = reader.read_utf()?;
        let value = reader.read_utf()?;
        record.add_value(property, value);
    }
    Ok(record)
}

fn write_utf(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::codec(format!("string of {} bytes is too long", value.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Cursor over big-endian encoded bytes.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::codec("unexpected end of input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    pub(crate) fn read_utf(&mut self) -> Result<String> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|err| Error::codec(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_are_dropped() {
        let record = Record::new().with_value("NAME", "").with_value("EMAIL", "a@b");
        assert!(!record.has_property("NAME"));
        assert_eq!(record.values("EMAIL"), ["a@b".to_string()]);
    }

    #[test]
    fn duplicate_values_collapse() {
        let record = Record::from_pairs([("ID", "1"), ("ID", "1"), ("ID", "legacy-1")]);
        assert_eq!(record.values("ID").len(), 2);
        assert_eq!(record.value("ID"), Some("1"));
    }

    #[test]
    fn codec_layout_is_count_then_strings() {
        let record = Record::from_pairs([("ID", "1")]);
        let bytes = encode_record(&record).unwrap();
        assert_eq!(&bytes[..4], &2i32.to_be_bytes());
        assert_eq!(&bytes[4..6], &2u16.to_be_bytes());
        assert_eq!(&bytes[6..8], b"ID");
        assert_eq!(&bytes[8..10], &1u16.to_be_bytes());
        assert_eq!(&bytes[10..], b"1");
    }

    #[test]
    fn codec_restores_multi_valued_properties() {
        let record = Record::from_pairs([
            ("ID", "1"),
            ("ID", "old-7"),
            ("NAME", "Ada Lovelace"),
            ("EMAIL", "ada@example.org"),
        ]);
        let decoded = decode_record(&encode_record(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn truncated_input_is_a_codec_error() {
        let bytes = encode_record(&Record::from_pairs([("NAME", "abc")])).unwrap();
        let err = decode_record(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn display_lists_properties() {
        let record = Record::from_pairs([("ID", "1"), ("NAME", "x")]);
        assert_eq!(record.to_string(), "{ID=[1], NAME=[x]}");
    }
}
