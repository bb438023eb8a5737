//! CrossRef works API: fallback search source and the DOI record types.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::parse::{matched_keywords, query_terms, score_relevance};
use crate::config::CrossRefConfig;
use crate::models::{ScholarResult, ScholarResultBuilder, SearchOptions};
use crate::sources::{is_valid_abstract, Source, SourceCapabilities, SourceError};
use crate::utils::{with_retry, HttpClient, RetryConfig};

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup pattern is valid"));

/// CrossRef research source
///
/// Uses the CrossRef REST API works search.
#[derive(Debug, Clone)]
pub struct CrossRefSource {
    client: Arc<HttpClient>,
    config: CrossRefConfig,
    cancel: CancellationToken,
}

impl CrossRefSource {
    pub fn new(config: &CrossRefConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::with_user_agent(&polite_user_agent(config))?),
            config: config.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort in-flight retries when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn search_url(&self, query: &str, options: &SearchOptions) -> String {
        let mut url = format!(
            "{}/works?query={}&rows={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            options.max_results
        );

        let mut filters = Vec::new();
        if let Some(from) = options.year_from {
            filters.push(format!("from-pub-date:{}", from));
        }
        if let Some(to) = options.year_to {
            filters.push(format!("until-pub-date:{}", to));
        }
        if !filters.is_empty() {
            url = format!("{}&filter={}", url, filters.join(","));
        }
        if let Some(mailto) = &self.config.mailto {
            url = format!("{}&mailto={}", url, urlencoding::encode(mailto));
        }
        url
    }

    fn to_result(
        work: CrossRefWork,
        terms: &[String],
        rank: usize,
        total: usize,
    ) -> Option<ScholarResult> {
        let title = work.first_title()?.to_string();

        let authors: Vec<String> = work
            .author
            .iter()
            .filter_map(CrossRefAuthor::display_name)
            .collect();
        let year = work.date_parts().map(|(year, _, _)| year);
        let journal = work.container_title.first().cloned();
        let snippet = work.abstract_plain().filter(|a| is_valid_abstract(a));

        let present = [
            !authors.is_empty(),
            year.is_some(),
            journal.is_some(),
            work.doi.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        let text = format!("{} {}", title, snippet.as_deref().unwrap_or_default());

        Some(
            ScholarResultBuilder::new(title, "crossref")
                .authors(authors)
                .year(year)
                .journal(journal)
                .doi(work.doi.map(|d| d.to_lowercase()))
                .url(work.url)
                .confidence(0.5 + 0.1 * present as f64)
                .relevance_score(score_relevance(terms, &text, rank, total))
                .keywords(matched_keywords(terms, &text))
                .citation_count(work.is_referenced_by_count.unwrap_or(0))
                .publisher(work.publisher)
                .snippet(snippet)
                .build(),
        )
    }
}

pub(crate) fn polite_user_agent(config: &CrossRefConfig) -> String {
    match &config.mailto {
        Some(mailto) => format!(
            "{}/{} (mailto:{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            mailto
        ),
        None => format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    }
}

#[async_trait]
impl Source for CrossRefSource {
    fn id(&self) -> &str {
        "crossref"
    }

    fn name(&self) -> &str {
        "CrossRef"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::DOI_LOOKUP
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScholarResult>, SourceError> {
        let url = self.search_url(query, options);
        let retry = RetryConfig::default()
            .max_attempts(2)
            .attempt_timeout(Duration::from_secs(10));

        let client = &self.client;
        let url = url.as_str();
        let data: CrossRefSearchResponse = with_retry(retry, &self.cancel, move |_| async move {
            let response = client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(SourceError::from_status(response.status(), "CrossRef API"));
            }
            Ok(response.json::<CrossRefSearchResponse>().await?)
        })
        .await?;

        let terms = query_terms(query);
        let total = data.message.items.len();
        Ok(data
            .message
            .items
            .into_iter()
            .enumerate()
            .filter_map(|(rank, work)| Self::to_result(work, &terms, rank, total))
            .collect())
    }
}

// ===== CrossRef API Types =====

#[derive(Debug, Deserialize)]
struct CrossRefSearchResponse {
    message: CrossRefItems,
}

#[derive(Debug, Deserialize)]
struct CrossRefItems {
    #[serde(default)]
    items: Vec<CrossRefWork>,
}

/// Envelope of `GET /works/{doi}`
#[derive(Debug, Deserialize)]
pub(crate) struct CrossRefWorkResponse {
    pub message: CrossRefWork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub(crate) struct CrossRefWork {
    pub title: Vec<String>,
    pub author: Vec<CrossRefAuthor>,
    pub issued: Option<CrossRefDate>,
    pub published_print: Option<CrossRefDate>,
    pub published_online: Option<CrossRefDate>,
    pub container_title: Vec<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub page: Option<String>,
    pub first_page: Option<String>,
    pub last_page: Option<String>,
    pub publisher: Option<String>,
    #[serde(rename = "ISBN")]
    pub isbn: Vec<String>,
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub subject: Vec<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub is_referenced_by_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CrossRefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    pub suffix: Option<String>,
    /// Organisational authors only carry a name
    pub name: Option<String>,
}

impl CrossRefAuthor {
    fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.given.as_deref(), self.family.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            self.name.clone().filter(|n| !n.trim().is_empty())
        } else {
            Some(parts.join(" "))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CrossRefDate {
    #[serde(rename = "date-parts")]
    pub date_parts: Vec<Vec<Option<i64>>>,
}

impl CrossRefWork {
    pub fn first_title(&self) -> Option<&str> {
        self.title
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }

    /// First usable `(year, month, day)` from issued, print, then online dates
    ///
    /// Years outside 1000..=2100 are treated as missing.
    pub fn date_parts(&self) -> Option<(i32, Option<u32>, Option<u32>)> {
        [&self.issued, &self.published_print, &self.published_online]
            .into_iter()
            .flatten()
            .filter_map(|date| date.date_parts.first())
            .find_map(|parts| {
                let year = parts.first().copied().flatten()?;
                let year = i32::try_from(year).ok().filter(|y| (1000..=2100).contains(y))?;
                let part = |i: usize| {
                    parts
                        .get(i)
                        .copied()
                        .flatten()
                        .and_then(|v| u32::try_from(v).ok())
                };
                Some((year, part(1), part(2)))
            })
    }

    /// Page range from `page`, or from the first/last page pair
    pub fn pages(&self) -> Option<String> {
        if let Some(page) = self.page.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            return Some(page.to_string());
        }
        match (self.first_page.as_deref(), self.last_page.as_deref()) {
            (Some(first), Some(last)) if first != last => Some(format!("{}-{}", first, last)),
            (Some(first), _) => Some(first.to_string()),
            _ => None,
        }
    }

    /// Abstract with JATS markup removed
    pub fn abstract_plain(&self) -> Option<String> {
        let raw = self.abstract_text.as_deref()?;
        let text = MARKUP.replace_all(raw, " ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_FIXTURE: &str = r#"{
        "status": "ok",
        "message": {
            "total-results": 2,
            "items": [
                {
                    "title": ["Deep learning for citation analysis"],
                    "author": [{"given": "Grace", "family": "Hopper"}, {"name": "The Consortium"}],
                    "issued": {"date-parts": [[2019, 3]]},
                    "container-title": ["Journal of Informetrics"],
                    "DOI": "10.1016/J.JOI.2019.01.001",
                    "URL": "https://doi.org/10.1016/j.joi.2019.01.001",
                    "publisher": "Elsevier",
                    "is-referenced-by-count": 42,
                    "type": "journal-article"
                },
                {"title": [], "author": []}
            ]
        }
    }"#;

    #[test]
    fn test_parse_search_items() {
        let data: CrossRefSearchResponse = serde_json::from_str(SEARCH_FIXTURE).unwrap();
        let terms = query_terms("citation analysis");
        let results: Vec<ScholarResult> = data
            .message
            .items
            .into_iter()
            .enumerate()
            .filter_map(|(rank, work)| CrossRefSource::to_result(work, &terms, rank, 2))
            .collect();

        assert_eq!(results.len(), 1);
        let first = &results[0];
        assert_eq!(first.authors, vec!["Grace Hopper", "The Consortium"]);
        assert_eq!(first.year, Some(2019));
        assert_eq!(first.doi.as_deref(), Some("10.1016/j.joi.2019.01.001"));
        assert_eq!(first.citation_count, 42);
        assert_eq!(first.source, "crossref");
        assert!((first.confidence - 0.9).abs() < 1e-9);
        assert!(first.relevance_score > 0.0);
    }

    #[test]
    fn test_date_parts_rejects_insane_years() {
        let work: CrossRefWork = serde_json::from_str(
            r#"{"issued": {"date-parts": [[99999]]}, "published-online": {"date-parts": [[2021, 7, 4]]}}"#,
        )
        .unwrap();
        assert_eq!(work.date_parts(), Some((2021, Some(7), Some(4))));

        let empty: CrossRefWork =
            serde_json::from_str(r#"{"issued": {"date-parts": [[null]]}}"#).unwrap();
        assert_eq!(empty.date_parts(), None);
    }

    #[test]
    fn test_pages_from_pair() {
        let work: CrossRefWork =
            serde_json::from_str(r#"{"first-page": "101", "last-page": "118"}"#).unwrap();
        assert_eq!(work.pages().as_deref(), Some("101-118"));

        let explicit: CrossRefWork = serde_json::from_str(r#"{"page": "5-9"}"#).unwrap();
        assert_eq!(explicit.pages().as_deref(), Some("5-9"));
    }

    #[test]
    fn test_abstract_markup_stripped() {
        let work: CrossRefWork = serde_json::from_str(
            r#"{"abstract": "<jats:p>We study   <jats:italic>things</jats:italic>.</jats:p>"}"#,
        )
        .unwrap();
        assert_eq!(work.abstract_plain().as_deref(), Some("We study things ."));
    }

    #[test]
    fn test_search_url_filters() {
        let config = CrossRefConfig {
            base_url: "https://api.crossref.org/".to_string(),
            doi_resolver: "https://doi.org".to_string(),
            mailto: Some("dev@example.org".to_string()),
        };
        let source = CrossRefSource::new(&config).unwrap();
        let url = source.search_url(
            "graph theory",
            &SearchOptions::new().max_results(5).years(Some(2010), Some(2020)),
        );

        assert_eq!(
            url,
            "https://api.crossref.org/works?query=graph%20theory&rows=5\
             &filter=from-pub-date:2010,until-pub-date:2020&mailto=dev%40example.org"
        );
    }
}
