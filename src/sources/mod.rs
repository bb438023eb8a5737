//! Search sources behind a common trait.
//!
//! The scraped search surface is driven by [`ScholarClient`], which layers
//! caching, request coalescing, rate limiting and retries over two HTML
//! parsing strategies. When the primary surface is unavailable the
//! [`FallbackCoordinator`] consults the [`Source`] implementations registered
//! in a [`SourceRegistry`], in configured order.
//!
//! # Adding a fallback source
//!
//! 1. Create a struct that implements [`Source`]
//! 2. Register it with [`SourceRegistry::register`]
//! 3. List its id under `fallback.fallback_sources`

mod crossref;
mod fallback;
pub mod mock;
mod openalex;
mod parse;
mod registry;
mod scholar;

pub use crossref::CrossRefSource;
pub(crate) use crossref::{polite_user_agent, CrossRefWork, CrossRefWorkResponse};
pub use fallback::FallbackCoordinator;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use parse::{
    has_no_results_indicator, is_blocked_page, is_valid_abstract, looks_like_title,
    query_terms, AlternativeParser, PrimaryParser, ResultParser,
};
pub use registry::{SourceCapabilities, SourceRegistry};
pub use scholar::{
    ClientStatus, ConnectionTest, ResultOrigin, ScholarClient, SearchOutcome, ServiceStatus,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::models::{ScholarResult, SearchOptions};
use crate::utils::RetryableError;

/// The interface every search source implements.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Unique identifier, as used in `fallback.fallback_sources`
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    /// Whether this source supports search
    fn supports_search(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::SEARCH)
    }

    /// Whether this source supports lookup by DOI
    fn supports_doi_lookup(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::DOI_LOOKUP)
    }

    /// Search for works matching the query
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScholarResult>, SourceError>;
}

/// Errors that can occur when interacting with a source
///
/// Cloneable so that coalesced callers can share a single rejection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Network or HTTP transport error
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not finish in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The remote side asked us to slow down
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Daily or account quota used up
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Robot check or access block page
    #[error("Access blocked: {0}")]
    Blocked(String),

    /// Parsing error (JSON, HTML)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// API error from the source
    #[error("API error: {0}")]
    Api(String),

    /// The service is down or the breaker is open
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Error: {0}")]
    Other(String),
}

impl SourceError {
    /// Map a non-success HTTP status onto an error
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let message = format!("{} returned status {}", context, status);
        match status.as_u16() {
            429 => SourceError::RateLimit(message),
            403 => SourceError::Blocked(message),
            404 => SourceError::NotFound(message),
            400 | 422 => SourceError::InvalidRequest(message),
            500..=599 => SourceError::Unavailable(message),
            _ => SourceError::Api(message),
        }
    }

    /// Key used to look up a custom user-facing message
    pub fn kind_key(&self) -> &'static str {
        match self {
            SourceError::Network(_) => "network",
            SourceError::Timeout(_) => "timeout",
            SourceError::RateLimit(_) | SourceError::Blocked(_) => "rate_limit",
            SourceError::QuotaExceeded(_) => "quota_exceeded",
            SourceError::Parse(_) => "parse",
            SourceError::InvalidRequest(_) => "invalid_format",
            SourceError::NotFound(_) => "not_found",
            SourceError::Unavailable(_) => "service_unavailable",
            SourceError::Cancelled => "cancelled",
            SourceError::Api(_) | SourceError::Other(_) => "other",
        }
    }
}

impl RetryableError for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Network(_) | SourceError::Timeout(_) | SourceError::Unavailable(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        SourceError::Timeout(format!("no response after {} ms", after.as_millis()))
    }

    fn cancelled() -> Self {
        SourceError::Cancelled
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::from_status(status, "Remote")
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}
