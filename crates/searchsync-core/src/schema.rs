//! Index schemas: named fields, their actions, and per-record-type extractors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::extract::RecordProxy;
use crate::types::{FieldValues, RecordType};

/// Capability applied to a field by the search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAction {
    /// Tokenized full-text indexing.
    Freetext,
    /// Feed the field's terms into spelling correction. Needs `Freetext`.
    Spell,
    /// Index the value verbatim as a single term.
    Exact,
    /// Like `Exact`, but values are trimmed and lowercased; meant for repeated values.
    Tag,
    /// Keep the value retrievable from search results.
    Store,
}

pub type Extractor = Arc<dyn Fn(&RecordProxy<'_>) -> anyhow::Result<FieldValues> + Send + Sync>;

#[derive(Clone)]
pub struct FieldSpec {
    name: String,
    actions: Vec<FieldAction>,
    extractors: BTreeMap<RecordType, Extractor>,
    fallback: Option<Extractor>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), actions: Vec::new(), extractors: BTreeMap::new(), fallback: None }
    }

    pub fn action(mut self, action: FieldAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = FieldAction>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Extractor used for records of `record_type`.
    pub fn extract_for<F>(mut self, record_type: RecordType, f: F) -> Self
    where
        F: Fn(&RecordProxy<'_>) -> anyhow::Result<FieldValues> + Send + Sync + 'static,
    {
        self.extractors.insert(record_type, Arc::new(f));
        self
    }

    /// Extractor used for record types without a dedicated one.
    pub fn extract_any<F>(mut self, f: F) -> Self
    where
        F: Fn(&RecordProxy<'_>) -> anyhow::Result<FieldValues> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    /// Attach a prebuilt extractor; `None` sets the fallback.
    pub fn with_extractor(mut self, record_type: Option<RecordType>, extractor: Extractor) -> Self {
        match record_type {
            Some(ty) => {
                self.extractors.insert(ty, extractor);
            }
            None => self.fallback = Some(extractor),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_actions(&self) -> &[FieldAction] {
        &self.actions
    }

    pub fn has(&self, action: FieldAction) -> bool {
        self.actions.contains(&action)
    }

    /// Dispatch on the record's type tag.
    pub fn extractor_for(&self, record_type: &RecordType) -> Option<&Extractor> {
        self.extractors.get(record_type).or(self.fallback.as_ref())
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.starts_with('_') {
            return Err(Error::SchemaViolation(format!(
                "field name '{}' is empty or uses the reserved '_' prefix",
                self.name
            )));
        }
        if self.actions.is_empty() {
            return Err(Error::SchemaViolation(format!("field '{}' has no actions", self.name)));
        }
        let mut seen = BTreeSet::new();
        for action in &self.actions {
            if !seen.insert(*action) {
                return Err(Error::SchemaViolation(format!(
                    "field '{}' lists {:?} twice",
                    self.name, action
                )));
            }
        }
        if self.has(FieldAction::Freetext) && (self.has(FieldAction::Exact) || self.has(FieldAction::Tag)) {
            return Err(Error::SchemaViolation(format!(
                "field '{}' cannot be both freetext and exact/tag",
                self.name
            )));
        }
        if self.has(FieldAction::Spell) && !self.has(FieldAction::Freetext) {
            return Err(Error::SchemaViolation(format!("field '{}' uses spell without freetext", self.name)));
        }
        if self.extractors.is_empty() && self.fallback.is_none() {
            return Err(Error::SchemaViolation(format!("field '{}' has no extractor", self.name)));
        }
        Ok(())
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .field("record_types", &self.extractors.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Immutable description of one index. Build with [`IndexSchema::builder`].
#[derive(Debug)]
pub struct IndexSchema {
    name: String,
    location: PathBuf,
    fields: Vec<FieldSpec>,
}

impl IndexSchema {
    pub fn builder(name: impl Into<String>, location: impl Into<PathBuf>) -> IndexSchemaBuilder {
        IndexSchemaBuilder { name: name.into(), location: location.into(), fields: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any field can extract something from records of this type.
    pub fn serves(&self, record_type: &RecordType) -> bool {
        self.fields.iter().any(|f| f.extractor_for(record_type).is_some())
    }
}

pub struct IndexSchemaBuilder {
    name: String,
    location: PathBuf,
    fields: Vec<FieldSpec>,
}

impl IndexSchemaBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<IndexSchema> {
        if self.name.is_empty() {
            return Err(Error::SchemaViolation("index name must not be empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::SchemaViolation(format!("index '{}' declares no fields", self.name)));
        }
        let mut names = BTreeSet::new();
        for field in &self.fields {
            field.validate()?;
            if !names.insert(field.name.as_str()) {
                return Err(Error::SchemaViolation(format!(
                    "index '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
        }
        Ok(IndexSchema { name: self.name, location: self.location, fields: self.fields })
    }
}
