//! Reference metadata from web pages.
//!
//! Pages are read through their `<meta>` tags, in order of reliability:
//! Highwire Press `citation_*` tags (used by most publishers and
//! repositories), then Dublin Core `dc.*`, then OpenGraph, then the plain
//! `description`/`keywords` tags and `<title>`.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use url::Url;

use super::doi::transport_error;
use super::ExtractionError;
use crate::config::ExtractionConfig;
use crate::models::{clamp_unit, Author, ReferenceMetadata, ReferenceType};
use crate::sources::{is_valid_abstract, SourceError};
use crate::utils::{find_doi, validate_doi, validate_url, HttpClient, ValidationError};

const BASE_CONFIDENCE: f64 = 0.3;
const FIELD_CONFIDENCE: f64 = 0.1;

static META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta").expect("meta selector is valid"));

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector is valid"));

/// Fetches pages and reads their citation metadata
#[derive(Debug, Clone)]
pub struct UrlExtractor {
    client: HttpClient,
    request_timeout: Duration,
    allow_private_hosts: bool,
}

impl UrlExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: HttpClient::new()?,
            request_timeout: Duration::from_millis(config.timeout_ms),
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Validate `input` as a fetchable URL
    pub fn check_url(&self, input: &str) -> Result<Url, ValidationError> {
        match validate_url(input) {
            Err(ValidationError::PrivateUrl(_)) if self.allow_private_hosts => {
                Url::parse(input.trim()).map_err(|e| ValidationError::InvalidUrl(e.to_string()))
            }
            other => other,
        }
    }

    /// Fetch `url` and extract what its metadata tags describe
    pub async fn extract_url_metadata(&self, url: &str) -> Result<ReferenceMetadata, ExtractionError> {
        let url = self.check_url(url)?;
        tracing::debug!("Fetching {}", url);

        let response = self
            .client
            .get(url.as_str())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_timeout))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(ExtractionError::NotFound(url.to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ExtractionError::RateLimited(format!("{} asked us to slow down", url)))
            }
            s if !s.is_success() => {
                return Err(ExtractionError::Network(format!("{} returned status {}", url, s)))
            }
            _ => {}
        }

        // Redirects may land somewhere else
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| transport_error(e, self.request_timeout))?;

        Ok(parse_html_metadata(&html, &final_url))
    }
}

/// Extract reference metadata from an HTML page
pub fn parse_html_metadata(html: &str, page_url: &str) -> ReferenceMetadata {
    let tags = MetaTags::parse(html);

    let mut metadata = ReferenceMetadata::new(tags.reference_type());

    metadata.title = tags
        .first(&["citation_title", "dc.title", "og:title"])
        .or_else(|| tags.page_title.clone());

    let names = ["citation_author", "dc.creator", "author"]
        .iter()
        .map(|key| tags.all(key))
        .find(|names| !names.is_empty())
        .unwrap_or_default();
    metadata.authors = names
        .iter()
        .flat_map(|value| split_authors(value))
        .filter_map(Author::parse)
        .collect();

    metadata.publication_date = tags
        .first(&[
            "citation_publication_date",
            "citation_date",
            "citation_online_date",
            "dc.date",
            "article:published_time",
        ])
        .and_then(|d| parse_date(&d));

    metadata.journal = tags.first(&["citation_journal_title", "citation_conference_title"]);
    metadata.volume = tags.first(&["citation_volume"]);
    metadata.issue = tags.first(&["citation_issue"]);
    metadata.pages = match (tags.first(&["citation_firstpage"]), tags.first(&["citation_lastpage"])) {
        (Some(first), Some(last)) if first != last => Some(format!("{}-{}", first, last)),
        (Some(first), _) => Some(first),
        _ => None,
    };
    metadata.publisher = tags.first(&["citation_publisher", "dc.publisher", "og:site_name"]);
    metadata.isbn = tags.first(&["citation_isbn"]);

    metadata.doi = ["citation_doi", "dc.identifier", "prism.doi"]
        .iter()
        .flat_map(|key| tags.all(key))
        .chain(std::iter::once(page_url.to_string()))
        .find_map(|value| validate_doi(&value).ok().or_else(|| find_doi(&value)))
        .map(|doi| doi.to_lowercase());

    metadata.url = tags
        .first(&["citation_abstract_html_url", "og:url"])
        .or_else(|| Some(page_url.to_string()));

    metadata.abstract_text = tags
        .first(&["citation_abstract", "dc.description", "og:description", "description"])
        .filter(|a| is_valid_abstract(a));

    metadata.keywords = tags
        .first(&["citation_keywords", "keywords"])
        .map(|k| {
            k.split([',', ';'])
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let present = [
        metadata.title.is_some(),
        !metadata.authors.is_empty(),
        metadata.publication_date.is_some(),
        metadata.journal.is_some(),
        metadata.publisher.is_some(),
        metadata.doi.is_some(),
        metadata.abstract_text.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    metadata.confidence = clamp_unit(BASE_CONFIDENCE + FIELD_CONFIDENCE * present as f64);

    metadata
}

/// `<meta>` values keyed by lowercase `name` or `property`
struct MetaTags {
    values: HashMap<String, Vec<String>>,
    page_title: Option<String>,
}

impl MetaTags {
    fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut values: HashMap<String, Vec<String>> = HashMap::new();

        for meta in document.select(&META) {
            let element = meta.value();
            let Some(key) = element.attr("name").or_else(|| element.attr("property")) else {
                continue;
            };
            let Some(content) = element.attr("content").map(str::trim).filter(|c| !c.is_empty())
            else {
                continue;
            };
            values
                .entry(key.trim().to_ascii_lowercase())
                .or_default()
                .push(content.to_string());
        }

        let page_title = document
            .select(&TITLE)
            .next()
            .map(|t| t.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());

        Self { values, page_title }
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.values.get(*key).and_then(|v| v.first()))
            .cloned()
    }

    fn all(&self, key: &str) -> Vec<String> {
        self.values.get(key).cloned().unwrap_or_default()
    }

    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn reference_type(&self) -> ReferenceType {
        if self.has("citation_journal_title") {
            ReferenceType::JournalArticle
        } else if self.has("citation_conference_title") {
            ReferenceType::ConferencePaper
        } else if self.has("citation_dissertation_institution") {
            ReferenceType::Thesis
        } else if self.has("citation_technical_report_institution") {
            ReferenceType::Report
        } else if self.has("citation_book_title") {
            ReferenceType::BookChapter
        } else if self.has("citation_isbn") {
            ReferenceType::Book
        } else if self.has("citation_patent_number") {
            ReferenceType::Patent
        } else {
            ReferenceType::Webpage
        }
    }
}

/// Some pages pack every author into one tag
fn split_authors(value: &str) -> Vec<&str> {
    if value.contains(';') {
        value.split(';').collect()
    } else if value.contains(" and ") {
        value.split(" and ").collect()
    } else {
        vec![value]
    }
}

/// Dates as found in metadata tags: `2021-03-04`, `2021/03/04`, `2021-03`, `2021`,
/// or an ISO timestamp
fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return Some(date);
        }
    }

    let mut parts = value.split(['-', '/']);
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if !(1000..=2100).contains(&year) {
        return None;
    }
    let month = parts
        .next()
        .and_then(|m| m.trim().parse::<u32>().ok())
        .unwrap_or(1);
    NaiveDate::from_ymd_opt(year, month, 1).or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
}
