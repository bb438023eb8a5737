//! OpenAlex fallback search source.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::parse::{matched_keywords, query_terms, score_relevance};
use crate::config::OpenAlexConfig;
use crate::models::{ScholarResult, ScholarResultBuilder, SearchOptions};
use crate::sources::{is_valid_abstract, Source, SourceError};
use crate::utils::{normalize_doi, with_retry, HttpClient, RetryConfig};

/// OpenAlex research source
///
/// Uses the OpenAlex REST API.
#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    client: Arc<HttpClient>,
    config: OpenAlexConfig,
    cancel: CancellationToken,
}

impl OpenAlexSource {
    /// Create a new OpenAlex source
    ///
    /// A configured `mailto` is sent with every request to join the polite pool.
    pub fn new(config: &OpenAlexConfig) -> Result<Self, SourceError> {
        let user_agent = match &config.mailto {
            Some(email) => format!(
                "{}/{} (mailto:{})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                email
            ),
            None => format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        };

        Ok(Self {
            client: Arc::new(HttpClient::with_user_agent(&user_agent)?),
            config: config.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort in-flight retries when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build request URL
    fn search_url(&self, query: &str, options: &SearchOptions) -> String {
        let mut url = format!(
            "{}/works?search={}&per-page={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            options.max_results
        );

        let mut filters = Vec::new();
        if let Some(from) = options.year_from {
            filters.push(format!("from_publication_date:{}-01-01", from));
        }
        if let Some(to) = options.year_to {
            filters.push(format!("to_publication_date:{}-12-31", to));
        }
        if !filters.is_empty() {
            url = format!("{}&filter={}", url, filters.join(","));
        }

        // Add email to request URL if available (for polite pool)
        if let Some(ref email) = self.config.mailto {
            url = format!("{}&mailto={}", url, urlencoding::encode(email));
        }
        url
    }

    /// Parse OpenAlex work data
    fn parse_work(
        work: OAWork,
        terms: &[String],
        rank: usize,
        total: usize,
    ) -> Option<ScholarResult> {
        let title = work
            .title
            .or(work.display_name)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;

        let authors: Vec<String> = work
            .authorships
            .iter()
            .filter_map(|a| a.author.display_name.clone())
            .collect();

        let location = work.primary_location.unwrap_or_default();
        let source = location.source.unwrap_or_default();
        let snippet = work
            .abstract_inverted_index
            .as_ref()
            .map(rebuild_abstract)
            .filter(|a| is_valid_abstract(a));

        let doi = work.doi.as_deref().map(|d| normalize_doi(d).to_lowercase());
        let present = [
            !authors.is_empty(),
            work.publication_year.is_some(),
            source.display_name.is_some(),
            doi.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        let text = format!("{} {}", title, snippet.as_deref().unwrap_or_default());

        Some(
            ScholarResultBuilder::new(title, "openalex")
                .authors(authors)
                .year(work.publication_year)
                .journal(source.display_name)
                .url(location.landing_page_url.or(work.id))
                .doi(doi)
                .confidence(0.5 + 0.1 * present as f64)
                .relevance_score(score_relevance(terms, &text, rank, total))
                .keywords(matched_keywords(terms, &text))
                .citation_count(work.cited_by_count.unwrap_or(0))
                .publisher(source.host_organization_name)
                .snippet(snippet)
                .build(),
        )
    }
}

/// Rebuild abstract text from OpenAlex's word → positions index
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    positioned.sort_unstable_by_key(|(position, _)| *position);
    positioned
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Source for OpenAlexSource {
    fn id(&self) -> &str {
        "openalex"
    }

    fn name(&self) -> &str {
        "OpenAlex"
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
        let data: WorksResponse = with_retry(retry, &self.cancel, move |_| async move {
            let response = client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(SourceError::from_status(response.status(), "OpenAlex API"));
            }
            Ok(response.json::<WorksResponse>().await?)
        })
        .await?;

        let terms = query_terms(query);
        let total = data.results.len();
        Ok(data
            .results
            .into_iter()
            .enumerate()
            .filter_map(|(rank, work)| Self::parse_work(work, &terms, rank, total))
            .collect())
    }
}

// ===== OpenAlex API Types =====

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<OAWork>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OAWork {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    publication_year: Option<i32>,
    cited_by_count: Option<u32>,
    doi: Option<String>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    primary_location: Option<OALocation>,
    authorships: Vec<OAAuthorship>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OALocation {
    landing_page_url: Option<String>,
    source: Option<OASource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OASource {
    display_name: Option<String>,
    host_organization_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OAAuthorship {
    author: OAAuthor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OAAuthor {
    display_name: Option<String>,
}
