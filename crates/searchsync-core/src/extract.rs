//! Record → document projection.

use serde_json::Value;

use crate::error::ExtractionError;
use crate::predicate::lookup;
use crate::schema::{Extractor, IndexSchema};
use crate::types::{Document, FieldValue, FieldValues, Record, RecordKey, RecordType};

/// What extractors see: the record plus its type discriminator.
#[derive(Debug, Clone, Copy)]
pub struct RecordProxy<'a> {
    record: &'a Record,
}

impl<'a> RecordProxy<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &'a Record {
        self.record
    }

    pub fn record_type(&self) -> &'a RecordType {
        &self.record.record_type
    }

    pub fn key(&self) -> &'a RecordKey {
        &self.record.key
    }

    pub fn is(&self, record_type: &str) -> bool {
        self.record.record_type == record_type
    }

    /// Raw JSON at a dotted path; `Value::Null` when absent.
    pub fn get(&self, path: &str) -> &'a Value {
        lookup(&self.record.data, path)
    }

    /// Single scalar at `path`, or nothing.
    pub fn text(&self, path: &str) -> FieldValues {
        FieldValue::from_json(self.get(path)).into()
    }

    /// Every scalar at `path`: array elements become separate values.
    pub fn all(&self, path: &str) -> FieldValues {
        match self.get(path) {
            Value::Array(items) => {
                let items = items.clone();
                FieldValues::lazy(items.into_iter().filter_map(|v| FieldValue::from_json(&v)))
            }
            other => FieldValue::from_json(other).into(),
        }
    }
}

/// Extractor reading a dotted JSON path, used by declarative schemas.
pub fn json_path_extractor(path: impl Into<String>) -> Extractor {
    let path = path.into();
    let extractor: Extractor =
        std::sync::Arc::new(move |proxy: &RecordProxy<'_>| -> anyhow::Result<FieldValues> { Ok(proxy.all(&path)) });
    extractor
}

/// Run every field extractor of `schema` against `proxy`.
///
/// The first failing extractor aborts this document only.
pub fn extract(schema: &IndexSchema, proxy: &RecordProxy<'_>) -> Result<Document, ExtractionError> {
    let record = proxy.record();
    let id = record.document_id();
    let mut fields = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let Some(extractor) = field.extractor_for(proxy.record_type()) else {
            continue;
        };
        let values = extractor(proxy)
            .map_err(|e| ExtractionError {
                document: id.to_string(),
                field: field.name().to_string(),
                message: format!("{e:#}"),
            })?
            .into_vec();
        if !values.is_empty() {
            fields.push((field.name().to_string(), values));
        }
    }
    Ok(Document { id, record_type: record.record_type.clone(), key: record.key.clone(), fields })
}
