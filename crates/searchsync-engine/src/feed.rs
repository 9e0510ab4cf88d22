//! OpenSearch 1.1 response elements for search result feeds.

use serde::Serialize;

use searchsync_text::search::escape_html;

pub const OPENSEARCH_NAMESPACE: &str = "http://a9.com/-/spec/opensearch/1.1/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSearchQuery {
    pub role: String,
    pub search_terms: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSearchMeta {
    pub total_results: usize,
    /// 1-based position of the first item of the page.
    pub start_index: usize,
    pub items_per_page: usize,
    pub request: OpenSearchQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<OpenSearchQuery>,
}

impl OpenSearchMeta {
    /// The `opensearch:` elements to embed in a feed root declaring [`OPENSEARCH_NAMESPACE`].
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(&format!("<opensearch:totalResults>{}</opensearch:totalResults>\n", self.total_results));
        xml.push_str(&format!("<opensearch:startIndex>{}</opensearch:startIndex>\n", self.start_index));
        xml.push_str(&format!("<opensearch:itemsPerPage>{}</opensearch:itemsPerPage>\n", self.items_per_page));
        for query in std::iter::once(&self.request).chain(self.correction.as_ref()) {
            xml.push_str(&query_element(query));
        }
        xml
    }
}

fn query_element(query: &OpenSearchQuery) -> String {
    let start_page = query.start_page.map(|p| format!(" startPage=\"{p}\"")).unwrap_or_default();
    format!(
        "<opensearch:Query role=\"{}\" searchTerms=\"{}\"{start_page}/>\n",
        escape_html(&query.role),
        escape_html(&query.search_terms)
    )
}
