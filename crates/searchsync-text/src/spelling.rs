//! "Did you mean" suggestions drawn from the term dictionaries of spell fields.
use std::collections::BTreeMap;

use tantivy::schema::Field;
use tantivy::{Searcher, Term};

use searchsync_core::error::Result;
use searchsync_core::schema::FieldAction;

use crate::index::TantivyIndex;
use crate::tantivy_utils::STOP_WORDS;

const OPERATORS: &[&str] = &["AND", "OR", "NOT"];

impl TantivyIndex {
	/// Corrected `text`, or `None` when every word is known (or unfixable).
	pub(crate) fn suggest(&self, text: &str) -> Result<Option<String>> {
		let fields: Vec<Field> = self.fields.with(FieldAction::Spell).map(|e| e.field).collect();
		if fields.is_empty() { return Ok(None); }
		let searcher = self.reader.searcher();

		let mut changed = false;
		let mut words = Vec::new();
		for word in text.split_whitespace() {
			let Some((prefix, core, suffix)) = split_word(word) else {
				words.push(word.to_string());
				continue;
			};
			let lowered = core.to_lowercase();
			if STOP_WORDS.contains(&lowered.as_str()) || self.is_known(&searcher, &fields, &lowered)? {
				words.push(word.to_string());
				continue;
			}
			match self.closest(&searcher, &fields, &lowered)? {
				Some(fix) => {
					changed = true;
					words.push(format!("{prefix}{fix}{suffix}"));
				}
				None => words.push(word.to_string()),
			}
		}
		Ok(changed.then(|| words.join(" ")))
	}

	fn is_known(&self, searcher: &Searcher, fields: &[Field], word: &str) -> Result<bool> {
		for field in fields {
			if searcher.doc_freq(&Term::from_field_text(*field, word)).map_err(|e| self.err(e))? > 0 { return Ok(true); }
		}
		Ok(false)
	}

	/// Best dictionary term within the edit limit: nearest first, then most frequent, then alphabetical.
	fn closest(&self, searcher: &Searcher, fields: &[Field], word: &str) -> Result<Option<String>> {
		let limit = max_edits(word);
		let len = word.chars().count();
		let mut candidates: BTreeMap<String, (usize, u64)> = BTreeMap::new();
		for segment in searcher.segment_readers() {
			for field in fields {
				let inverted = segment.inverted_index(*field).map_err(|e| self.err(e))?;
				let mut stream = inverted.terms().stream().map_err(|e| self.err(e))?;
				while stream.advance() {
					let Ok(term) = std::str::from_utf8(stream.key()) else { continue };
					if term.chars().count().abs_diff(len) > limit { continue; }
					let distance = levenshtein(word, term);
					if distance == 0 || distance > limit { continue; }
					let entry = candidates.entry(term.to_string()).or_insert((distance, 0));
					entry.1 += u64::from(stream.value().doc_freq);
				}
			}
		}
		let best = candidates
			.into_iter()
			.min_by(|(a, (da, fa)), (b, (db, fb))| da.cmp(db).then(fb.cmp(fa)).then(a.cmp(b)));
		Ok(best.map(|(term, _)| term))
	}
}

fn max_edits(word: &str) -> usize {
	if word.chars().count() <= 4 { 1 } else { 2 }
}

/// Split punctuation off a query word. Operators, field-qualified and
/// non-alphabetic tokens are left alone.
fn split_word(word: &str) -> Option<(&str, &str, &str)> {
	if OPERATORS.contains(&word) || word.contains(':') { return None; }
	let start = word.find(char::is_alphanumeric)?;
	let end = word.rfind(char::is_alphanumeric).map(|i| i + word[i..].chars().next().map_or(1, char::len_utf8))?;
	let core = &word[start..end];
	if !core.chars().all(char::is_alphabetic) { return None; }
	Some((&word[..start], core, &word[end..]))
}

pub(crate) fn levenshtein(s1: &str, s2: &str) -> usize {
	let a: Vec<char> = s1.chars().collect();
	let b: Vec<char> = s2.chars().collect();
	let mut prev: Vec<usize> = (0..=b.len()).collect();
	let mut curr = vec![0; b.len() + 1];
	for (i, c1) in a.iter().enumerate() {
		curr[0] = i + 1;
		for (j, c2) in b.iter().enumerate() {
			let cost = usize::from(c1 != c2);
			curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
		}
		std::mem::swap(&mut prev, &mut curr);
	}
	prev[b.len()]
}
