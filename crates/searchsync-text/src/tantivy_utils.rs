//! Mapping from an `IndexSchema` to a tantivy schema, plus the analyzer used by
//! freetext fields.
use std::sync::Arc;

use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

use searchsync_core::error::{Error, Result};
use searchsync_core::schema::{FieldAction, IndexSchema};

pub const TOKENIZER: &str = "searchsync_text";
pub const ID_FIELD: &str = "_id";
pub const TYPE_FIELD: &str = "_type";
pub const KEY_FIELD: &str = "_key";

pub const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

pub fn build_schema(schema: &IndexSchema) -> Schema {
	let mut builder = Schema::builder();
	builder.add_text_field(ID_FIELD, STRING | STORED);
	builder.add_text_field(TYPE_FIELD, STRING | STORED);
	builder.add_text_field(KEY_FIELD, STRING | STORED);
	for spec in schema.fields() {
		let mut options = TextOptions::default();
		if spec.has(FieldAction::Freetext) {
			let indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
			options = options.set_indexing_options(indexing);
		} else if spec.has(FieldAction::Exact) || spec.has(FieldAction::Tag) {
			let indexing = TextFieldIndexing::default().set_tokenizer("raw").set_index_option(IndexRecordOption::Basic);
			options = options.set_indexing_options(indexing);
		}
		if spec.has(FieldAction::Store) { options = options.set_stored(); }
		builder.add_text_field(spec.name(), options);
	}
	builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}

/// Tag values are indexed trimmed and lowercased.
pub fn normalize_tag(value: &str) -> String {
	value.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub(crate) struct FieldEntry {
	pub name: String,
	pub field: Field,
	pub actions: Vec<FieldAction>,
}

impl FieldEntry {
	pub fn has(&self, action: FieldAction) -> bool { self.actions.contains(&action) }

	pub fn is_indexed(&self) -> bool {
		self.has(FieldAction::Freetext) || self.has(FieldAction::Exact) || self.has(FieldAction::Tag)
	}
}

/// Resolved tantivy handles for every schema field.
#[derive(Debug, Clone)]
pub(crate) struct FieldMap {
	pub id: Field,
	pub record_type: Field,
	pub key: Field,
	pub entries: Arc<Vec<FieldEntry>>,
}

impl FieldMap {
	pub fn resolve(schema: &IndexSchema, tantivy_schema: &Schema) -> Result<Self> {
		let get = |name: &str| tantivy_schema.get_field(name).map_err(|e| Error::SchemaViolation(format!("index '{}': {e}", schema.name())));
		let mut entries = Vec::with_capacity(schema.fields().len());
		for spec in schema.fields() {
			entries.push(FieldEntry { name: spec.name().to_string(), field: get(spec.name())?, actions: spec.field_actions().to_vec() });
		}
		Ok(Self { id: get(ID_FIELD)?, record_type: get(TYPE_FIELD)?, key: get(KEY_FIELD)?, entries: Arc::new(entries) })
	}

	pub fn entry(&self, name: &str) -> Option<&FieldEntry> {
		self.entries.iter().find(|e| e.name == name)
	}

	pub fn with(&self, action: FieldAction) -> impl Iterator<Item = &FieldEntry> {
		self.entries.iter().filter(move |e| e.has(action))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use searchsync_core::schema::FieldSpec;

	#[test]
	fn reserved_and_declared_fields_are_mapped() {
		let schema = IndexSchema::builder("main", "idx")
			.field(FieldSpec::new("name").actions([FieldAction::Freetext, FieldAction::Store]).extract_any(|r| Ok(r.text("name"))))
			.field(FieldSpec::new("tags").action(FieldAction::Tag).extract_any(|r| Ok(r.all("tags"))))
			.build()
			.unwrap();
		let tantivy_schema = build_schema(&schema);
		let name = tantivy_schema.get_field_entry(tantivy_schema.get_field("name").unwrap());
		assert!(name.is_indexed() && name.is_stored());
		let tags = tantivy_schema.get_field_entry(tantivy_schema.get_field("tags").unwrap());
		assert!(tags.is_indexed() && !tags.is_stored());
		let fields = FieldMap::resolve(&schema, &tantivy_schema).unwrap();
		assert_eq!(fields.with(FieldAction::Tag).count(), 1);
		assert_eq!(normalize_tag("  Sci-Fi "), "sci-fi");
	}
}
