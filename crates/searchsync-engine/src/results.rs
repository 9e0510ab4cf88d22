//! Result pages and their resolution back into records.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use searchsync_core::error::Result;
use searchsync_core::query::Query;
use searchsync_core::types::{DocumentId, Hit, RawResults, Record, RecordKey, RecordType, UnresolvedPolicy};
use searchsync_text::search::escape_html;

use crate::feed::{OpenSearchMeta, OpenSearchQuery};
use crate::index::SearchIndex;

/// Summaries are cut to this many characters unless asked otherwise.
pub const SUMMARY_CHARS: usize = 180;
const HIGHLIGHT_CHARS: usize = 10_000;

pub struct ResultSet<'a> {
    index: &'a SearchIndex,
    query: Query,
    query_string: Option<String>,
    page: usize,
    num_per_page: usize,
    raw: RawResults,
    spell_suggestion: Option<String>,
    search_time: Duration,
}

impl<'a> ResultSet<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: &'a SearchIndex,
        query: Query,
        query_string: Option<String>,
        page: usize,
        num_per_page: usize,
        raw: RawResults,
        spell_suggestion: Option<String>,
        search_time: Duration,
    ) -> Self {
        Self { index, query, query_string, page, num_per_page, raw, spell_suggestion, search_time }
    }

    /// The page actually served, which may be lower than the one requested.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn num_per_page(&self) -> usize {
        self.num_per_page
    }

    /// Position of the first hit of this page in the full ranking.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.num_per_page)
    }

    pub fn total(&self) -> usize {
        self.raw.total
    }

    pub fn total_is_exact(&self) -> bool {
        self.raw.total_is_exact
    }

    pub fn num_pages(&self) -> usize {
        self.raw.total.div_ceil(self.num_per_page)
    }

    pub fn hits(&self) -> &[Hit] {
        &self.raw.hits
    }

    pub fn len(&self) -> usize {
        self.raw.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.hits.is_empty()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn search_time(&self) -> Duration {
        self.search_time
    }

    pub fn spell_suggestion(&self) -> Option<&str> {
        self.spell_suggestion.as_deref()
    }

    /// The suggestion with every changed word wrapped in `<strong><em>`.
    pub fn spell_suggestion_html(&self) -> Option<String> {
        let suggestion = self.spell_suggestion.as_deref()?;
        Some(mark_changes(self.query_string.as_deref().unwrap_or_default(), suggestion))
    }

    /// Spell-check `text` after the fact, for queries that were not given as a string.
    pub fn suggest_spelling(&mut self, text: &str) -> Result<Option<&str>> {
        self.spell_suggestion = self.index.spell_correct(text)?;
        if self.query_string.is_none() {
            self.query_string = Some(text.to_string());
        }
        Ok(self.spell_suggestion.as_deref())
    }

    /// Hits of this page with their records, fetched in one go per record type.
    pub fn results(&self) -> Result<Vec<SearchResult<'_>>> {
        let mut wanted: BTreeMap<&RecordType, Vec<RecordKey>> = BTreeMap::new();
        for hit in &self.raw.hits {
            wanted.entry(&hit.record_type).or_default().push(hit.key.clone());
        }
        let mut found: HashMap<DocumentId, Record> = HashMap::with_capacity(self.raw.hits.len());
        for (record_type, keys) in wanted {
            for record in self.index.records().fetch_many(record_type, &keys)? {
                found.insert(record.document_id(), record);
            }
        }

        let policy = self.index.unresolved();
        let mut results = Vec::with_capacity(self.raw.hits.len());
        for hit in &self.raw.hits {
            let record = found.remove(&hit.id);
            if record.is_none() {
                tracing::debug!(id = %hit.id, index = self.index.name(), "hit has no record");
                if policy == UnresolvedPolicy::Skip {
                    continue;
                }
            }
            results.push(SearchResult { index: self.index, query: &self.query, hit, record });
        }
        Ok(results)
    }

    /// Full match count per registered record type, for "narrow your search" links.
    pub fn type_counts(&self) -> Result<Vec<(RecordType, usize)>> {
        let mut counts = Vec::new();
        for record_type in self.index.registered_types() {
            let narrowed = self.query.clone().filter(Query::RecordType(record_type.clone()));
            let total = self.index.backend().search(&narrowed, 0, 0)?.total;
            if total > 0 {
                counts.push((record_type, total));
            }
        }
        Ok(counts)
    }

    pub fn opensearch(&self, include_correction: bool) -> OpenSearchMeta {
        let search_terms = self.query_string.clone().unwrap_or_default();
        OpenSearchMeta {
            total_results: self.raw.total,
            start_index: self.offset().saturating_add(1),
            items_per_page: self.num_per_page,
            request: OpenSearchQuery { role: "request".into(), search_terms, start_page: Some(self.page) },
            correction: self
                .spell_suggestion
                .as_ref()
                .filter(|_| include_correction)
                .map(|s| OpenSearchQuery { role: "correction".into(), search_terms: s.clone(), start_page: None }),
        }
    }
}

impl std::fmt::Debug for ResultSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("index", &self.index.name())
            .field("page", &self.page)
            .field("num_per_page", &self.num_per_page)
            .field("total", &self.raw.total)
            .field("hits", &self.raw.hits.len())
            .finish()
    }
}

/// One hit, optionally resolved to its record.
pub struct SearchResult<'a> {
    index: &'a SearchIndex,
    query: &'a Query,
    hit: &'a Hit,
    record: Option<Record>,
}

impl<'a> SearchResult<'a> {
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.record.is_some()
    }

    pub fn hit(&self) -> &'a Hit {
        self.hit
    }

    pub fn id(&self) -> &DocumentId {
        &self.hit.id
    }

    pub fn record_type(&self) -> &RecordType {
        &self.hit.record_type
    }

    pub fn key(&self) -> &RecordKey {
        &self.hit.key
    }

    pub fn score(&self) -> f32 {
        self.hit.score
    }

    /// Stored values of `field`; empty unless the field carries the `Store` action.
    pub fn stored(&self, field: &str) -> &'a [String] {
        self.hit.stored.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, field: &str) -> Option<&'a str> {
        self.stored(field).first().map(String::as_str)
    }

    /// Every stored value of `field` with the query terms marked up.
    pub fn highlighted(&self, field: &str) -> Result<Vec<String>> {
        self.stored(field)
            .iter()
            .map(|value| self.index.backend().highlight(self.query, field, value, HIGHLIGHT_CHARS))
            .collect()
    }

    pub fn summarised(&self, field: &str) -> Result<String> {
        self.summarised_to(field, SUMMARY_CHARS)
    }

    /// The best passage of `field`, at most `max_chars` long, with the query terms marked up.
    pub fn summarised_to(&self, field: &str, max_chars: usize) -> Result<String> {
        let text = self.stored(field).join(" ");
        if text.is_empty() {
            return Ok(text);
        }
        self.index.backend().highlight(self.query, field, &text, max_chars)
    }
}

/// Words are compared by position; words past the end of the original count as changed.
fn mark_changes(original: &str, suggestion: &str) -> String {
    let original: Vec<&str> = original.split_whitespace().collect();
    suggestion
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| match original.get(i) {
            Some(before) if *before == word => escape_html(word),
            _ => format!("<strong><em>{}</em></strong>", escape_html(word)),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_words_are_emphasised() {
        assert_eq!(mark_changes("dume by herbret", "dune by herbert"), "<strong><em>dune</em></strong> by <strong><em>herbert</em></strong>");
        assert_eq!(mark_changes("dune", "dune"), "dune");
    }

    #[test]
    fn repeated_spaces_do_not_shift_words() {
        assert_eq!(mark_changes("dume  by\therbert ", "dune by herbert"), "<strong><em>dune</em></strong> by herbert");
    }

    #[test]
    fn markup_is_escaped() {
        assert_eq!(mark_changes("a<b", "a&b"), "<strong><em>a&amp;b</em></strong>");
    }
}
