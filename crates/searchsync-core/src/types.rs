//! Domain types shared by the store, the text backend and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Position in the change log. `0` means "nothing applied yet".
pub type Sequence = u64;

/// Type discriminator carried with every record reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(String);

impl RecordType {
    /// Record type names end up inside document ids, so `:` is not allowed.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(':') {
            return Err(Error::SchemaViolation(format!("invalid record type name '{name}'")));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for RecordType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RecordType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Primary key of a record within its type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// A unit of source-of-truth data as handed out by a record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_type: RecordType,
    pub key: RecordKey,
    pub data: serde_json::Value,
}

impl Record {
    pub fn new(record_type: RecordType, key: impl Into<RecordKey>, data: serde_json::Value) -> Self {
        Self { record_type, key: key.into(), data }
    }

    pub fn document_id(&self) -> DocumentId {
        DocumentId::new(&self.record_type, &self.key)
    }
}

/// Stable identifier of one record's document inside one index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(record_type: &RecordType, key: &RecordKey) -> Self {
        Self(format!("{}:{}", record_type, key))
    }

    /// Split back into (record type, key). Keys may contain `:`, types may not.
    pub fn parse(raw: &str) -> Option<(RecordType, RecordKey)> {
        let (ty, key) = raw.split_once(':')?;
        Some((RecordType::new(ty).ok()?, RecordKey::new(key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Added,
    Updated,
    Deleted,
}

impl Operation {
    pub fn code(self) -> i64 {
        match self {
            Operation::Added => 1,
            Operation::Updated => 2,
            Operation::Deleted => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Operation::Added),
            2 => Some(Operation::Updated),
            3 => Some(Operation::Deleted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Added => "added",
            Operation::Updated => "updated",
            Operation::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub seq: Sequence,
    pub record_type: RecordType,
    pub key: RecordKey,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
}

/// A single extracted value. Everything is indexed as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(n) => write!(f, "{n}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl FieldValue {
    /// Scalar JSON to value; arrays, objects and null have no single value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            _ => None,
        }
    }
}

/// What an extractor produces: nothing, one value, or a lazy run of values.
pub enum FieldValues {
    Empty,
    One(FieldValue),
    Lazy(Box<dyn Iterator<Item = FieldValue>>),
}

impl FieldValues {
    pub fn lazy<I>(values: I) -> Self
    where
        I: IntoIterator<Item = FieldValue>,
        I::IntoIter: 'static,
    {
        FieldValues::Lazy(Box::new(values.into_iter()))
    }

    pub fn into_vec(self) -> Vec<FieldValue> {
        match self {
            FieldValues::Empty => Vec::new(),
            FieldValues::One(v) => vec![v],
            FieldValues::Lazy(iter) => iter.collect(),
        }
    }
}

impl fmt::Debug for FieldValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValues::Empty => f.write_str("Empty"),
            FieldValues::One(v) => f.debug_tuple("One").field(v).finish(),
            FieldValues::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

macro_rules! field_values_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValues {
                fn from(value: $ty) -> Self {
                    FieldValues::One(value.into())
                }
            }

            impl From<Option<$ty>> for FieldValues {
                fn from(value: Option<$ty>) -> Self {
                    match value {
                        Some(v) => FieldValues::One(v.into()),
                        None => FieldValues::Empty,
                    }
                }
            }
        )*
    };
}

field_values_from!(FieldValue, &str, String, i64, f64, bool);

/// The document written to an index for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub record_type: RecordType,
    pub key: RecordKey,
    /// Schema-ordered; fields without values are left out.
    pub fields: Vec<(String, Vec<FieldValue>)>,
}

impl Document {
    pub fn values(&self, field: &str) -> &[FieldValue] {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }
}

/// One match as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: DocumentId,
    pub record_type: RecordType,
    pub key: RecordKey,
    pub score: f32,
    /// Values of fields carrying the `Store` action.
    pub stored: BTreeMap<String, Vec<String>>,
}

/// What result resolution does with hits whose record no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Drop them; the page may come back shorter than requested.
    #[default]
    Skip,
    /// Keep them with no record attached.
    Surface,
}

/// A page of hits plus the total match count.
#[derive(Debug, Clone, Default)]
pub struct RawResults {
    pub hits: Vec<Hit>,
    pub total: usize,
    pub total_is_exact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_round_trips_keys_with_colons() {
        let ty = RecordType::new("book").unwrap();
        let id = DocumentId::new(&ty, &RecordKey::new("isbn:42"));
        assert_eq!(id.as_str(), "book:isbn:42");
        let (t, k) = DocumentId::parse(id.as_str()).unwrap();
        assert_eq!(t, ty);
        assert_eq!(k.as_str(), "isbn:42");
    }

    #[test]
    fn record_type_rejects_separator() {
        assert!(RecordType::new("a:b").is_err());
        assert!(RecordType::new("").is_err());
    }

    #[test]
    fn lazy_values_are_drained_in_order() {
        let values = FieldValues::lazy(vec!["a", "b", "c"].into_iter().map(FieldValue::from));
        let got: Vec<String> = values.into_vec().iter().map(ToString::to_string).collect();
        assert_eq!(got, ["a", "b", "c"]);
    }
}
