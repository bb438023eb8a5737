//! DOI resolution against the CrossRef works API.

use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::join_all;
use reqwest::StatusCode;

use super::ExtractionError;
use crate::config::{CrossRefConfig, ExtractionConfig};
use crate::models::{Author, ReferenceMetadata, ReferenceType};
use crate::sources::{polite_user_agent, CrossRefWork, CrossRefWorkResponse, SourceError};
use crate::utils::{validate_doi, HttpClient};

/// Confidence of a record for a DOI that resolved at all
const BASE_CONFIDENCE: f64 = 0.8;
/// Added per present field: title, authors, date, container, publisher
const FIELD_CONFIDENCE: f64 = 0.04;

/// Resolves DOIs to reference metadata
#[derive(Debug, Clone)]
pub struct DoiExtractor {
    client: HttpClient,
    config: CrossRefConfig,
    request_timeout: Duration,
    accessibility_timeout: Duration,
}

impl DoiExtractor {
    pub fn new(config: &CrossRefConfig, extraction: &ExtractionConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: HttpClient::with_user_agent(&polite_user_agent(config))?,
            config: config.clone(),
            request_timeout: Duration::from_millis(extraction.timeout_ms),
            accessibility_timeout: Duration::from_millis(extraction.accessibility_timeout_ms),
        })
    }

    /// Resolver URL for a bare DOI
    pub fn resolver_url(&self, doi: &str) -> String {
        format!("{}/{}", self.config.doi_resolver.trim_end_matches('/'), doi)
    }

    /// Look up `doi` and map the work record
    ///
    /// Accepts resolver URLs and `doi:` prefixes.
    pub async fn extract_doi_metadata(&self, doi: &str) -> Result<ReferenceMetadata, ExtractionError> {
        let doi = validate_doi(doi)?;
        let url = format!(
            "{}/works/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&doi)
        );
        tracing::debug!("Resolving DOI {} via {}", doi, url);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &doi));
        }

        let body: CrossRefWorkResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                ExtractionError::Parse(format!("unexpected DOI record for {}: {}", doi, e))
            } else {
                transport_error(e, self.request_timeout)
            }
        })?;

        Ok(map_work(body.message, &doi, &self.resolver_url(&doi)))
    }

    /// Resolve many DOIs concurrently; each entry succeeds or fails on its own
    pub async fn extract_multiple_dois(
        &self,
        dois: &[String],
    ) -> Vec<Result<ReferenceMetadata, ExtractionError>> {
        join_all(dois.iter().map(|doi| self.extract_doi_metadata(doi))).await
    }

    /// Whether the resolver answers for `doi`, without fetching the record
    pub async fn check_doi_accessibility(&self, doi: &str) -> bool {
        let Ok(doi) = validate_doi(doi) else {
            return false;
        };

        match self
            .client
            .head(&self.resolver_url(&doi))
            .timeout(self.accessibility_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.is_redirection()
            }
            Err(e) => {
                tracing::debug!("DOI {} is not accessible: {}", doi, e);
                false
            }
        }
    }
}

fn status_error(status: StatusCode, doi: &str) -> ExtractionError {
    match status {
        StatusCode::NOT_FOUND => ExtractionError::NotFound(format!("DOI {}", doi)),
        StatusCode::TOO_MANY_REQUESTS => {
            ExtractionError::RateLimited("DOI lookup API rate limit reached".to_string())
        }
        StatusCode::BAD_REQUEST => ExtractionError::InvalidDoi(doi.to_string()),
        _ => ExtractionError::Network(format!("DOI lookup returned status {}", status)),
    }
}

pub(crate) fn transport_error(error: reqwest::Error, limit: Duration) -> ExtractionError {
    if error.is_timeout() {
        ExtractionError::Timeout(limit.as_millis() as u64)
    } else {
        ExtractionError::Network(error.to_string())
    }
}

fn map_work(work: CrossRefWork, doi: &str, resolver_url: &str) -> ReferenceMetadata {
    let reference_type = work
        .work_type
        .as_deref()
        .map(ReferenceType::from_work_type)
        .unwrap_or(ReferenceType::Other);

    let mut metadata = ReferenceMetadata::new(reference_type);
    metadata.title = work.first_title().map(str::to_string);
    metadata.authors = work
        .author
        .iter()
        .filter_map(|a| Author::from_parts(a.given.as_deref(), a.family.as_deref(), a.suffix.as_deref()))
        .collect();
    metadata.publication_date = work.date_parts().and_then(|(year, month, day)| {
        NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
            .or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
    });
    metadata.journal = work
        .container_title
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string);
    metadata.pages = work.pages();
    metadata.abstract_text = work.abstract_plain();
    metadata.isbn = work.isbn.first().cloned();
    metadata.doi = Some(work.doi.as_deref().unwrap_or(doi).to_lowercase());
    metadata.url = Some(work.url.unwrap_or_else(|| resolver_url.to_string()));
    metadata.volume = work.volume;
    metadata.issue = work.issue;
    metadata.publisher = work.publisher.filter(|p| !p.trim().is_empty());
    metadata.keywords = work.subject;

    let present = [
        metadata.title.is_some(),
        !metadata.authors.is_empty(),
        metadata.publication_date.is_some(),
        metadata.journal.is_some(),
        metadata.publisher.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    metadata.confidence = (BASE_CONFIDENCE + FIELD_CONFIDENCE * present as f64).min(1.0);

    metadata
}
