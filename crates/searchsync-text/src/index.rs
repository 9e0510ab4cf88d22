use std::collections::BTreeMap;
use std::path::Path;

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::schema::Value;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError, Term};

use searchsync_core::error::{Error, Result};
use searchsync_core::query::Query;
use searchsync_core::schema::{FieldAction, IndexSchema};
use searchsync_core::traits::{SearchBackend, WriteConnection};
use searchsync_core::types::{Document, DocumentId, Hit, RawResults, RecordKey, RecordType};

use crate::tantivy_utils::{build_schema, normalize_tag, register_tokenizer, FieldMap};

const WRITER_HEAP: usize = 50_000_000;

/// One tantivy index serving one `IndexSchema`.
pub struct TantivyIndex {
	pub(crate) name: String,
	pub(crate) index: Index,
	pub(crate) reader: IndexReader,
	pub(crate) fields: FieldMap,
}

impl TantivyIndex {
	/// Open (or create) the index at the schema's location.
	pub fn open(schema: &IndexSchema) -> Result<Self> {
		Self::open_at(schema, schema.location())
	}

	/// Fails with `SchemaViolation` if an index with a different layout exists there.
	pub fn open_at(schema: &IndexSchema, location: &Path) -> Result<Self> {
		std::fs::create_dir_all(location).map_err(|e| Error::backend(schema.name(), e))?;
		let dir = MmapDirectory::open(location).map_err(|e| Error::backend(schema.name(), e))?;
		let index = Index::open_or_create(dir, build_schema(schema)).map_err(|e| match e {
			TantivyError::SchemaError(msg) => Error::SchemaViolation(format!("index '{}' at {}: {msg}", schema.name(), location.display())),
			other => Error::backend(schema.name(), other),
		})?;
		tracing::info!(index = schema.name(), location = %location.display(), "opened tantivy index");
		Self::from_index(schema, index)
	}

	pub fn open_in_ram(schema: &IndexSchema) -> Result<Self> {
		Self::from_index(schema, Index::create_in_ram(build_schema(schema)))
	}

	/// Wipe the schema's location and start an empty index there.
	pub fn create(schema: &IndexSchema) -> Result<Self> {
		let location = schema.location();
		if location.exists() { std::fs::remove_dir_all(location).map_err(|e| Error::backend(schema.name(), e))?; }
		std::fs::create_dir_all(location).map_err(|e| Error::backend(schema.name(), e))?;
		let index = Index::create_in_dir(location, build_schema(schema)).map_err(|e| Error::backend(schema.name(), e))?;
		tracing::info!(index = schema.name(), location = %location.display(), "created empty tantivy index");
		Self::from_index(schema, index)
	}

	fn from_index(schema: &IndexSchema, index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let reader = index
			.reader_builder()
			.reload_policy(ReloadPolicy::Manual)
			.try_into()
			.map_err(|e| Error::backend(schema.name(), e))?;
		let fields = FieldMap::resolve(schema, &index.schema())?;
		Ok(Self { name: schema.name().to_string(), index, reader, fields })
	}

	pub(crate) fn err(&self, e: impl std::fmt::Display) -> Error {
		Error::backend(&self.name, e)
	}

	fn to_hit(&self, doc: &TantivyDocument, score: f32) -> Result<Hit> {
		let text = |field: tantivy::schema::Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or_default().to_string();
		let record_type = RecordType::new(text(self.fields.record_type)).map_err(|e| self.err(e))?;
		let key = RecordKey::new(text(self.fields.key));
		let mut stored = BTreeMap::new();
		for entry in self.fields.with(FieldAction::Store) {
			let values: Vec<String> = doc.get_all(entry.field).filter_map(|v| v.as_str().map(str::to_string)).collect();
			if !values.is_empty() { stored.insert(entry.name.clone(), values); }
		}
		Ok(Hit { id: DocumentId::new(&record_type, &key), record_type, key, score, stored })
	}
}

impl SearchBackend for TantivyIndex {
	fn name(&self) -> &str { &self.name }

	fn writer(&self) -> Result<Box<dyn WriteConnection>> {
		let writer: IndexWriter = self.index.writer_with_num_threads(1, WRITER_HEAP).map_err(|e| self.err(e))?;
		Ok(Box::new(TantivyWriteConnection { name: self.name.clone(), writer, reader: self.reader.clone(), fields: self.fields.clone() }))
	}

	fn search(&self, query: &Query, offset: usize, limit: usize) -> Result<RawResults> {
		let searcher = self.reader.searcher();
		let q = self.translate(query)?;
		// TopDocs sizes its heap by offset + limit; nothing ranks past the last document
		let num_docs = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
		let limit = limit.min(num_docs);
		if limit == 0 || offset >= num_docs {
			let total = searcher.search(&*q, &Count).map_err(|e| self.err(e))?;
			return Ok(RawResults { hits: Vec::new(), total, total_is_exact: true });
		}
		let (top_docs, total) = searcher.search(&*q, &(TopDocs::with_limit(limit).and_offset(offset), Count)).map_err(|e| self.err(e))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(|e| self.err(e))?;
			hits.push(self.to_hit(&doc, score)?);
		}
		Ok(RawResults { hits, total, total_is_exact: true })
	}

	fn spell_correct(&self, text: &str) -> Result<Option<String>> { self.suggest(text) }

	fn highlight(&self, query: &Query, field: &str, text: &str, max_chars: usize) -> Result<String> {
		self.snippet(query, field, text, max_chars)
	}

	fn doc_count(&self) -> Result<u64> {
		Ok(self.reader.searcher().num_docs())
	}
}

/// The single writer of one index. Uncommitted work is rolled back on drop.
pub struct TantivyWriteConnection {
	name: String,
	writer: IndexWriter,
	reader: IndexReader,
	fields: FieldMap,
}

impl TantivyWriteConnection {
	fn err(&self, e: impl std::fmt::Display) -> Error { Error::backend(&self.name, e) }
}

impl WriteConnection for TantivyWriteConnection {
	fn replace(&mut self, document: &Document) -> Result<()> {
		self.writer.delete_term(Term::from_field_text(self.fields.id, document.id.as_str()));
		let mut doc = TantivyDocument::default();
		doc.add_text(self.fields.id, document.id.as_str());
		doc.add_text(self.fields.record_type, document.record_type.as_str());
		doc.add_text(self.fields.key, document.key.as_str());
		for (name, values) in &document.fields {
			let entry = self.fields.entry(name).ok_or_else(|| Error::SchemaViolation(format!("index '{}' has no field '{name}'", self.name)))?;
			let tag = entry.has(FieldAction::Tag);
			for value in values {
				let text = value.to_string();
				if tag { doc.add_text(entry.field, normalize_tag(&text)); } else { doc.add_text(entry.field, text); }
			}
		}
		self.writer.add_document(doc).map_err(|e| self.err(e))?;
		Ok(())
	}

	fn delete(&mut self, id: &DocumentId) -> Result<()> {
		self.writer.delete_term(Term::from_field_text(self.fields.id, id.as_str()));
		Ok(())
	}

	fn clear(&mut self) -> Result<()> {
		self.writer.delete_all_documents().map_err(|e| self.err(e))?;
		Ok(())
	}

	fn commit(self: Box<Self>) -> Result<()> {
		let mut this = *self;
		this.writer.commit().map_err(|e| this.err(e))?;
		this.reader.reload().map_err(|e| this.err(e))?;
		let name = this.name.clone();
		this.writer.wait_merging_threads().map_err(|e| Error::backend(&name, e))?;
		tracing::debug!(index = %name, "committed");
		Ok(())
	}
}
