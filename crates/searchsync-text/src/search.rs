//! Query translation and highlighting.
use tantivy::query::{AllQuery, BooleanQuery, ConstScoreQuery, EmptyQuery, Occur, Query as TantivyQuery, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::snippet::SnippetGenerator;
use tantivy::Term;

use searchsync_core::error::{Error, Result};
use searchsync_core::query::Query;
use searchsync_core::schema::FieldAction;

use crate::index::TantivyIndex;
use crate::tantivy_utils::normalize_tag;

impl TantivyIndex {
	pub(crate) fn translate(&self, query: &Query) -> Result<Box<dyn TantivyQuery>> {
		let translated: Box<dyn TantivyQuery> = match query {
			Query::Parse(text) if text.trim().is_empty() => Box::new(EmptyQuery),
			Query::Parse(text) => {
				let parser = QueryParser::for_index(&self.index, self.default_fields());
				parser.parse_query(text).map_err(|e| Error::InvalidQuery(format!("'{text}': {e}")))?
			}
			Query::Term { field, value } => self.term_query(field, value)?,
			Query::RecordType(record_type) => {
				Box::new(TermQuery::new(Term::from_field_text(self.fields.record_type, record_type.as_str()), IndexRecordOption::Basic))
			}
			Query::All => Box::new(AllQuery),
			Query::And(items) if items.is_empty() => Box::new(AllQuery),
			Query::And(items) => Box::new(BooleanQuery::new(self.clauses(items, Occur::Must)?)),
			Query::Or(items) if items.is_empty() => Box::new(EmptyQuery),
			Query::Or(items) => Box::new(BooleanQuery::new(self.clauses(items, Occur::Should)?)),
			Query::Filter { query, filter } => {
				let filter: Box<dyn TantivyQuery> = Box::new(ConstScoreQuery::new(self.translate(filter)?, 0.0));
				Box::new(BooleanQuery::new(vec![(Occur::Must, self.translate(query)?), (Occur::Must, filter)]))
			}
		};
		Ok(translated)
	}

	/// Freetext fields, or every indexed field when the schema has none.
	fn default_fields(&self) -> Vec<Field> {
		let freetext: Vec<Field> = self.fields.with(FieldAction::Freetext).map(|e| e.field).collect();
		if !freetext.is_empty() { return freetext; }
		self.fields.entries.iter().filter(|e| e.is_indexed()).map(|e| e.field).collect()
	}

	fn clauses(&self, items: &[Query], occur: Occur) -> Result<Vec<(Occur, Box<dyn TantivyQuery>)>> {
		items.iter().map(|q| Ok((occur, self.translate(q)?))).collect()
	}

	fn term_query(&self, field: &str, value: &str) -> Result<Box<dyn TantivyQuery>> {
		let entry = self.fields.entry(field).ok_or_else(|| Error::InvalidQuery(format!("index '{}' has no field '{field}'", self.name)))?;
		if !entry.is_indexed() {
			return Err(Error::InvalidQuery(format!("field '{field}' is stored but not searchable")));
		}
		if !entry.has(FieldAction::Freetext) {
			let text = if entry.has(FieldAction::Tag) { normalize_tag(value) } else { value.to_string() };
			return Ok(Box::new(TermQuery::new(Term::from_field_text(entry.field, &text), IndexRecordOption::Basic)));
		}

		// analyze like the indexed text so case and stop words line up
		let mut analyzer = self.index.tokenizer_for_field(entry.field).map_err(|e| self.err(e))?;
		let mut terms: Vec<Term> = Vec::new();
		{
			let mut stream = analyzer.token_stream(value);
			stream.process(&mut |token: &tantivy::tokenizer::Token| terms.push(Term::from_field_text(entry.field, &token.text)));
		}
		let query: Box<dyn TantivyQuery> = match terms.len() {
			0 => Box::new(EmptyQuery),
			1 => Box::new(TermQuery::new(terms.remove(0), IndexRecordOption::WithFreqs)),
			_ => Box::new(BooleanQuery::new(
				terms.into_iter().map(|t| (Occur::Must, Box::new(TermQuery::new(t, IndexRecordOption::WithFreqs)) as Box<dyn TantivyQuery>)).collect(),
			)),
		};
		Ok(query)
	}

	pub(crate) fn snippet(&self, query: &Query, field: &str, text: &str, max_chars: usize) -> Result<String> {
		let entry = self.fields.entry(field).ok_or_else(|| Error::InvalidQuery(format!("index '{}' has no field '{field}'", self.name)))?;
		if !entry.has(FieldAction::Freetext) { return Ok(escape_html(truncate(text, max_chars))); }
		let searcher = self.reader.searcher();
		let q = self.translate(query)?;
		let mut generator = SnippetGenerator::create(&searcher, &*q, entry.field).map_err(|e| self.err(e))?;
		generator.set_max_num_chars(max_chars);
		let snippet = generator.snippet(text);
		if snippet.fragment().is_empty() { return Ok(escape_html(truncate(text, max_chars))); }
		Ok(snippet.to_html())
	}
}

/// First `max_chars` characters, cut back to a word boundary when possible.
pub fn truncate(text: &str, max_chars: usize) -> &str {
	match text.char_indices().nth(max_chars) {
		None => text,
		Some((end, _)) => {
			let head = &text[..end];
			match head.rfind(char::is_whitespace) {
				Some(space) if space > 0 => head[..space].trim_end(),
				_ => head,
			}
		}
	}
}

pub fn escape_html(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			c => out.push(c),
		}
	}
	out
}
