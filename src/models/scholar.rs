//! Search result model produced by the scraping client and fallback sources.

use serde::{Deserialize, Serialize};

/// A single search hit
///
/// `confidence` and `relevance_score` are always within `[0, 1]`; the builder
/// clamps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScholarResult {
    pub title: String,

    pub authors: Vec<String>,

    pub year: Option<i32>,

    /// Journal, venue or container title
    pub journal: Option<String>,

    pub doi: Option<String>,

    pub url: Option<String>,

    /// How trustworthy the extracted record is
    pub confidence: f64,

    /// How well the record matches the query
    pub relevance_score: f64,

    pub citation_count: u32,

    pub keywords: Vec<String>,

    pub publisher: Option<String>,

    /// Abstract or snippet text, when one passed validation
    pub snippet: Option<String>,

    /// Identifier of the source that produced this record
    pub source: String,
}

impl ScholarResult {
    /// Whether the record carries a DOI
    pub fn has_doi(&self) -> bool {
        self.doi.is_some()
    }

    /// Low-confidence records should be presented as provisional
    pub fn is_provisional(&self) -> bool {
        self.confidence < 0.3
    }
}

/// Builder for constructing ScholarResult objects
#[derive(Debug, Clone)]
pub struct ScholarResultBuilder {
    result: ScholarResult,
}

impl ScholarResultBuilder {
    /// Create a new builder with required fields
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            result: ScholarResult {
                title: title.into(),
                authors: Vec::new(),
                year: None,
                journal: None,
                doi: None,
                url: None,
                confidence: 0.5,
                relevance_score: 0.0,
                citation_count: 0,
                keywords: Vec::new(),
                publisher: None,
                snippet: None,
                source: source.into(),
            },
        }
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.result.authors = authors;
        self
    }

    pub fn year(mut self, year: Option<i32>) -> Self {
        self.result.year = year;
        self
    }

    pub fn journal(mut self, journal: Option<String>) -> Self {
        self.result.journal = journal.filter(|j| !j.trim().is_empty());
        self
    }

    pub fn doi(mut self, doi: Option<String>) -> Self {
        self.result.doi = doi;
        self
    }

    pub fn url(mut self, url: Option<String>) -> Self {
        self.result.url = url;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.result.confidence = confidence;
        self
    }

    pub fn relevance_score(mut self, score: f64) -> Self {
        self.result.relevance_score = score;
        self
    }

    pub fn citation_count(mut self, count: u32) -> Self {
        self.result.citation_count = count;
        self
    }

    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.result.keywords = keywords;
        self
    }

    pub fn publisher(mut self, publisher: Option<String>) -> Self {
        self.result.publisher = publisher.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn snippet(mut self, snippet: Option<String>) -> Self {
        self.result.snippet = snippet;
        self
    }

    /// Build the result, clamping scores into `[0, 1]`
    pub fn build(mut self) -> ScholarResult {
        self.result.confidence = clamp_unit(self.result.confidence);
        self.result.relevance_score = clamp_unit(self.result.relevance_score);
        self.result
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Options for a search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Maximum number of results to return
    pub max_results: usize,

    /// Earliest publication year
    pub year_from: Option<i32>,

    /// Latest publication year
    pub year_to: Option<i32>,

    /// Interface language hint (e.g. "en")
    pub language: Option<String>,

    /// Skip request coalescing and run immediately
    pub force_immediate: bool,

    /// Skip the cache lookup (results are still cached)
    pub bypass_cache: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            year_from: None,
            year_to: None,
            language: None,
            force_immediate: false,
            bypass_cache: false,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Restrict to a year range
    pub fn years(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.year_from = from;
        self.year_to = to;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn force_immediate(mut self, force: bool) -> Self {
        self.force_immediate = force;
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Parameters that change the response, for cache and coalescing keys
    pub fn fingerprint(&self) -> String {
        format!(
            "max={}|from={}|to={}|lang={}",
            self.max_results,
            self.year_from.map(|y| y.to_string()).unwrap_or_default(),
            self.year_to.map(|y| y.to_string()).unwrap_or_default(),
            self.language.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_scores() {
        let result = ScholarResultBuilder::new("Attention Is All You Need", "scholar")
            .confidence(1.7)
            .relevance_score(-0.2)
            .build();

        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.relevance_score, 0.0);

        let nan = ScholarResultBuilder::new("t", "s").confidence(f64::NAN).build();
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_builder_drops_blank_fields() {
        let result = ScholarResultBuilder::new("Title", "scholar")
            .journal(Some("  ".to_string()))
            .publisher(Some("ACM".to_string()))
            .build();

        assert_eq!(result.journal, None);
        assert_eq!(result.publisher.as_deref(), Some("ACM"));
    }

    #[test]
    fn test_fingerprint_ignores_execution_flags() {
        let a = SearchOptions::new().max_results(5);
        let b = SearchOptions::new().max_results(5).force_immediate(true);
        let c = SearchOptions::new().max_results(6);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
