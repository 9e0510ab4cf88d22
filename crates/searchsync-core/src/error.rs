use thiserror::Error;

use crate::types::Sequence;

/// A single document whose field extraction failed.
///
/// Never fatal to a batch: the update and rebuild engines record it and move on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("extraction of '{field}' failed for {document}: {message}")]
pub struct ExtractionError {
    pub document: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Change log append failed for {record_type} #{key}: {message}")]
    LogAppend {
        record_type: String,
        key: String,
        message: String,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Index '{index}' unavailable: {message}")]
    BackendUnavailable { index: String, message: String },

    #[error("Record store failed: {0}")]
    Store(String),

    #[error("An update is already in progress for consumer '{0}'")]
    UpdateInProgress(String),

    #[error("Watermark of consumer '{consumer}' moved: expected {expected}, found {found}")]
    WatermarkConflict {
        consumer: String,
        expected: Sequence,
        found: Sequence,
    },
}

impl Error {
    pub fn backend(index: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::BackendUnavailable { index: index.into(), message: err.to_string() }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Error::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
