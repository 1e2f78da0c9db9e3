//! Label-keyed structured messages.
//!
//! A [`Record`] is the unit of data exchanged between blocks. Entries keep
//! insertion order so that the first label of a record stays the time label
//! when the producer stamps it first. The reserved label [`TIME_LABEL`]
//! carries elapsed seconds since the shared time origin `t0`.

use crate::consts::TIME_LABEL;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single value stored under a record label.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// One floating-point reading or command.
    Scalar(f64),
    /// Several readings of the same quantity (e.g. a streamed chunk).
    Sequence(Vec<f64>),
    /// Opaque bulk payload (e.g. a raw frame).
    Buffer(Vec<u8>),
}

impl Value {
    /// Numeric view of the value.
    ///
    /// Returns `None` for buffers, which carry no comparable scalars.
    pub fn scalars(&self) -> Option<&[f64]> {
        match self {
            Self::Scalar(v) => Some(std::slice::from_ref(v)),
            Self::Sequence(v) => Some(v),
            Self::Buffer(_) => None,
        }
    }

    /// First scalar of the value, if any.
    pub fn first_scalar(&self) -> Option<f64> {
        self.scalars().and_then(|s| s.first().copied())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::Sequence(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Buffer(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(v) => serializer.serialize_f64(*v),
            Self::Sequence(v) => v.serialize(serializer),
            Self::Buffer(v) => serializer.serialize_bytes(v),
        }
    }
}

/// Ordered mapping from label to [`Value`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record whose first entry is the time label.
    pub fn stamped(elapsed_s: f64) -> Self {
        let mut record = Self {
            entries: Vec::with_capacity(4),
        };
        record.insert(TIME_LABEL, elapsed_s);
        record
    }

    /// Insert or replace a value. Replacing keeps the original position.
    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<Value>) {
        let label = label.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(label, value);
        self
    }

    /// Value stored under `label`.
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
    }

    /// First scalar stored under `label`.
    pub fn scalar(&self, label: &str) -> Option<f64> {
        self.get(label).and_then(Value::first_scalar)
    }

    /// Elapsed time carried by the record, if stamped.
    pub fn time(&self) -> Option<f64> {
        self.scalar(TIME_LABEL)
    }

    /// Whether `label` is present.
    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    /// Labels in insertion order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    /// `(label, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether both records carry exactly the same labels in the same order.
    pub fn same_labels(&self, other: &Record) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((a, _), (b, _))| a == b)
    }

    /// Copy every entry of `other` into `self`, overwriting shared labels.
    pub fn merge(&mut self, other: &Record) {
        for (label, value) in &other.entries {
            self.insert(label.clone(), value.clone());
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, value) in &self.entries {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}
