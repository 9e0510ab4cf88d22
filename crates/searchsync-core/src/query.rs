//! Backend-neutral query tree.

use crate::types::RecordType;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Raw user input, handed to the backend's query parser.
    Parse(String),
    /// One term on one field. Freetext and tag fields normalize `value` first.
    Term { field: String, value: String },
    /// Documents projected from records of this type.
    RecordType(RecordType),
    All,
    And(Vec<Query>),
    Or(Vec<Query>),
    /// Matches like `query AND filter`, but only `query` contributes to the score.
    Filter { query: Box<Query>, filter: Box<Query> },
}

impl Query {
    pub fn parse(text: impl Into<String>) -> Self {
        Query::Parse(text.into())
    }

    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term { field: field.into(), value: value.into() }
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Query::And(mut items) => {
                items.push(other);
                Query::And(items)
            }
            q => Query::And(vec![q, other]),
        }
    }

    pub fn or(self, other: Query) -> Self {
        match self {
            Query::Or(mut items) => {
                items.push(other);
                Query::Or(items)
            }
            q => Query::Or(vec![q, other]),
        }
    }

    pub fn filter(self, filter: Query) -> Self {
        Query::Filter { query: Box::new(self), filter: Box::new(filter) }
    }

    /// The raw text when this query is plain user input.
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Query::Parse(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Parse(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Parse(text)
    }
}
