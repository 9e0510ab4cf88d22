//! Declarative record selection.
//!
//! A [`Predicate`] is evaluated in memory by the update engine (against the
//! current state of one record) and translated to a query by record stores
//! during a rebuild. Both paths must agree, so comparison follows SQLite's
//! `json_extract` semantics: a missing path reads as `null`, and booleans
//! compare as the numbers `1`/`0`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::Record;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    All,
    Equals { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Equals { path: path.into(), value: value.into() }
    }

    pub fn one_of<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In { path: path.into(), values: values.into_iter().map(Into::into).collect() }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Reject paths and comparison values the store translation cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::All => Ok(()),
            Predicate::Equals { path, value } => {
                check_path(path)?;
                check_scalar(value)
            }
            Predicate::In { path, values } => {
                check_path(path)?;
                values.iter().try_for_each(check_scalar)
            }
            Predicate::Not(inner) => inner.validate(),
            Predicate::And(items) | Predicate::Or(items) => items.iter().try_for_each(Predicate::validate),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Equals { path, value } => scalar_eq(lookup(&record.data, path), value),
            Predicate::In { path, values } => {
                let actual = lookup(&record.data, path);
                // SQL `NULL IN (..)` never holds
                !actual.is_null() && values.iter().any(|v| scalar_eq(actual, v))
            }
            Predicate::Not(inner) => !inner.matches(record),
            Predicate::And(items) => items.iter().all(|p| p.matches(record)),
            Predicate::Or(items) => items.iter().any(|p| p.matches(record)),
        }
    }
}

static NULL: Value = Value::Null;

/// Resolve a dotted path (`author.name`) inside a JSON document.
pub fn lookup<'a>(data: &'a Value, path: &str) -> &'a Value {
    let mut current = data;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => v,
                None => return &NULL,
            },
            _ => return &NULL,
        };
    }
    current
}

/// Dotted path to the `$.a.b` form understood by SQLite's JSON1 functions.
pub fn json_path(path: &str) -> String {
    format!("$.{path}")
}

fn check_path(path: &str) -> Result<()> {
    let ok = !path.is_empty()
        && path
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if ok {
        Ok(())
    } else {
        Err(Error::SchemaViolation(format!("invalid predicate path '{path}'")))
    }
}

fn check_scalar(value: &Value) -> Result<()> {
    match value {
        Value::Array(_) | Value::Object(_) => {
            Err(Error::SchemaViolation(format!("predicate values must be scalars, got {value}")))
        }
        _ => Ok(()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn scalar_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => a == b,
        (a, b) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;
    use serde_json::json;

    fn record(data: Value) -> Record {
        Record::new(RecordType::new("book").unwrap(), "1", data)
    }

    #[test]
    fn equals_follows_nested_paths() {
        let r = record(json!({"meta": {"status": "published"}}));
        assert!(Predicate::equals("meta.status", "published").matches(&r));
        assert!(!Predicate::equals("meta.status", "draft").matches(&r));
    }

    #[test]
    fn missing_reads_as_null() {
        let r = record(json!({"title": "Dune"}));
        assert!(Predicate::equals("deleted_at", Value::Null).matches(&r));
        assert!(!Predicate::one_of("lang", ["en"]).matches(&r));
        assert!(Predicate::equals("lang", "en").not().matches(&r));
    }

    #[test]
    fn booleans_compare_numerically() {
        let r = record(json!({"published": true, "votes": 3}));
        assert!(Predicate::equals("published", 1).matches(&r));
        assert!(Predicate::equals("votes", 3.0).matches(&r));
    }

    #[test]
    fn validate_rejects_structured_values() {
        assert!(Predicate::equals("tags", json!(["a"])).validate().is_err());
        assert!(Predicate::equals("bad path", 1).validate().is_err());
        assert!(Predicate::And(vec![Predicate::equals("a.b", 1), Predicate::All]).validate().is_ok());
    }
}
