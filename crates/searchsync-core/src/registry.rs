//! Which record selections are projected into which index schemas.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::schema::IndexSchema;
use crate::types::RecordType;

#[derive(Debug, Clone)]
pub struct Registration {
    pub record_type: RecordType,
    pub schema: Arc<IndexSchema>,
    pub predicate: Predicate,
}

impl Registration {
    pub fn schema_name(&self) -> &str {
        self.schema.name()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    schemas: BTreeMap<String, Arc<IndexSchema>>,
    registrations: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schema(&mut self, schema: IndexSchema) -> Result<Arc<IndexSchema>> {
        if self.schemas.contains_key(schema.name()) {
            return Err(Error::SchemaViolation(format!("index '{}' is defined twice", schema.name())));
        }
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Bind `record_type` (narrowed by `predicate`) to the schema named `schema`.
    pub fn register(&mut self, record_type: RecordType, schema: &str, predicate: Predicate) -> Result<()> {
        let schema = self
            .schemas
            .get(schema)
            .cloned()
            .ok_or_else(|| Error::SchemaViolation(format!("unknown index '{schema}'")))?;
        if self.registrations.iter().any(|r| r.record_type == record_type && r.schema_name() == schema.name()) {
            return Err(Error::SchemaViolation(format!(
                "'{}' is already registered with index '{}'",
                record_type,
                schema.name()
            )));
        }
        if !schema.serves(&record_type) {
            return Err(Error::SchemaViolation(format!(
                "no field of index '{}' extracts records of type '{}'",
                schema.name(),
                record_type
            )));
        }
        predicate.validate()?;
        tracing::debug!(record_type = %record_type, index = schema.name(), "registered");
        self.registrations.push(Registration { record_type, schema, predicate });
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<IndexSchema>> {
        self.schemas.get(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<IndexSchema>> {
        self.schemas.values()
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    /// Every (schema, predicate) a change of `record_type` may affect.
    pub fn schemas_for(&self, record_type: &RecordType) -> Vec<&Registration> {
        self.registrations.iter().filter(|r| &r.record_type == record_type).collect()
    }

    pub fn registrations_for_schema(&self, schema: &str) -> Vec<&Registration> {
        self.registrations.iter().filter(|r| r.schema_name() == schema).collect()
    }

    pub fn record_types(&self) -> BTreeSet<RecordType> {
        self.registrations.iter().map(|r| r.record_type.clone()).collect()
    }
}
