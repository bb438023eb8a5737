//! Metadata extraction engine.
//!
//! [`MetadataExtractor`] resolves a citation source (a DOI or a web page URL)
//! into [`ReferenceMetadata`]. When no type is given the source is checked as
//! a DOI first, since that pattern is the more specific one, and then as a
//! URL. Each attempt races a timeout and transient failures are retried with
//! exponential backoff. If the chosen method still fails, the other method is
//! tried once: a DOI through its resolver page, a URL through a DOI found
//! inside it. Results below the confidence threshold are rejected.
//!
//! Like the search client, the engine never returns remote failures as
//! `Err`; every call resolves to an [`ExtractionResult`].

mod doi;
mod url;

pub use doi::DoiExtractor;
pub use url::{parse_html_metadata, UrlExtractor};

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ErrorHandlingConfig, ExtractionConfig};
use crate::models::{
    ExtractionRequest, ExtractionResult, ReferenceMetadata, SourceKind, SourceValidation,
};
use crate::sources::SourceError;
use crate::utils::{
    cache_key, find_doi, normalize_doi, system_clock, validate_doi, with_retry, CacheStats, Clock,
    DebounceError, DebounceManager, Metrics, MetricsCollector, ResponseCache, RetryConfig,
    RetryableError, ValidationError,
};

/// Errors that can occur while extracting metadata
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("Invalid DOI format: {0}")]
    InvalidDoi(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Private or local URL rejected: {0}")]
    PrivateUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Limit in milliseconds
    #[error("Extraction timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No meaningful metadata found for {0}")]
    NoMeaningfulMetadata(String),

    #[error("Extracted metadata confidence {confidence:.2} is below the threshold {threshold:.2}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Source is neither a valid URL nor a valid DOI: {0}")]
    InvalidSource(String),
}

impl ExtractionError {
    /// Key used to look up a custom user-facing message
    pub fn kind_key(&self) -> &'static str {
        match self {
            ExtractionError::InvalidDoi(_)
            | ExtractionError::InvalidUrl(_)
            | ExtractionError::PrivateUrl(_)
            | ExtractionError::InvalidSource(_) => "invalid_format",
            ExtractionError::NotFound(_) => "not_found",
            ExtractionError::RateLimited(_) => "rate_limit",
            ExtractionError::Timeout(_) => "timeout",
            ExtractionError::Network(_) => "network",
            ExtractionError::Parse(_) => "parse",
            ExtractionError::NoMeaningfulMetadata(_) => "no_metadata",
            ExtractionError::LowConfidence { .. } => "low_confidence",
            ExtractionError::Cancelled => "cancelled",
        }
    }

    /// Whether the input itself was rejected
    pub fn is_validation(&self) -> bool {
        self.kind_key() == "invalid_format"
    }
}

impl RetryableError for ExtractionError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractionError::Timeout(_) | ExtractionError::Network(_) | ExtractionError::RateLimited(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        ExtractionError::Timeout(after.as_millis() as u64)
    }

    fn cancelled() -> Self {
        ExtractionError::Cancelled
    }
}

impl From<ValidationError> for ExtractionError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidDoi(s) => ExtractionError::InvalidDoi(s),
            ValidationError::InvalidUrl(s) => ExtractionError::InvalidUrl(s),
            ValidationError::PrivateUrl(s) => ExtractionError::PrivateUrl(s),
        }
    }
}

/// Everything a coalesced extraction needs, shared by `Arc`
#[derive(Debug)]
struct Engine {
    doi: DoiExtractor,
    url: UrlExtractor,
    config: ExtractionConfig,
    error_handling: ErrorHandlingConfig,
    cancel: CancellationToken,
}

impl Engine {
    fn retry_config(&self, attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(self.config.retry_base_delay_ms),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_millis(self.config.timeout_ms),
            ..RetryConfig::default()
        }
    }

    /// Decide how `source` should be resolved
    fn detect(&self, source: &str) -> Result<SourceKind, ExtractionError> {
        if validate_doi(source).is_ok() {
            return Ok(SourceKind::Doi);
        }
        match self.url.check_url(source) {
            Ok(_) => Ok(SourceKind::Url),
            // Well-formed but not fetchable; report why on extraction
            Err(ValidationError::PrivateUrl(_)) => Ok(SourceKind::Url),
            Err(_) => Err(ExtractionError::InvalidSource(source.trim().to_string())),
        }
    }

    async fn run(&self, request: &ExtractionRequest) -> ExtractionResult {
        let started = Instant::now();
        let outcome = self.resolve(request).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((metadata, method)) => {
                tracing::debug!(
                    conversation_id = ?request.conversation_id,
                    "Extracted metadata for {} via {} in {}ms",
                    request.source,
                    method,
                    elapsed
                );
                ExtractionResult::succeeded(&request.source, metadata, method, elapsed)
            }
            Err(error) => {
                if self.error_handling.enable_detailed_logging {
                    tracing::debug!(?error, conversation_id = ?request.conversation_id, "Extraction failed");
                }
                tracing::warn!("Extraction failed for {}: {}", request.source, error);
                let message = self.error_handling.render(error.kind_key(), &error.to_string());
                ExtractionResult::failed(&request.source, message, elapsed)
            }
        }
    }

    async fn resolve(
        &self,
        request: &ExtractionRequest,
    ) -> Result<(ReferenceMetadata, SourceKind), ExtractionError> {
        let source = request.source.trim();
        let kind = match request.kind {
            Some(kind) => kind,
            None => self.detect(source)?,
        };

        let attempts = 1 + self.config.retry_attempts;
        let error = match self.extract_with(kind, source, attempts).await {
            Ok(metadata) => return self.accept(metadata).map(|m| (m, kind)),
            Err(e) => e,
        };

        if !self.config.fallback_to_alternate_method
            || error.is_validation()
            || error == ExtractionError::Cancelled
        {
            return Err(error);
        }

        let alternate = kind.alternate();
        let Some(alternate_source) = self.alternate_source(kind, source) else {
            return Err(error);
        };

        tracing::info!(
            "{} extraction failed ({}), trying {} {}",
            kind,
            error,
            alternate,
            alternate_source
        );
        match self.extract_with(alternate, &alternate_source, 1).await {
            Ok(metadata) => self.accept(metadata).map(|m| (m, alternate)),
            Err(alternate_error) => {
                tracing::debug!("Alternate method failed too: {}", alternate_error);
                Err(error)
            }
        }
    }

    /// The same work addressed through the other method
    fn alternate_source(&self, kind: SourceKind, source: &str) -> Option<String> {
        match kind {
            SourceKind::Doi => validate_doi(source).ok().map(|doi| self.doi.resolver_url(&doi)),
            SourceKind::Url => find_doi(source).map(|doi| normalize_doi(&doi)),
        }
    }

    async fn extract_with(
        &self,
        kind: SourceKind,
        source: &str,
        attempts: u32,
    ) -> Result<ReferenceMetadata, ExtractionError> {
        let engine = self;
        with_retry(self.retry_config(attempts), &self.cancel, move |attempt| {
            engine.attempt(kind, source, attempt)
        })
        .await
    }

    async fn attempt(
        &self,
        kind: SourceKind,
        source: &str,
        attempt: u32,
    ) -> Result<ReferenceMetadata, ExtractionError> {
        tracing::debug!("Extraction attempt {} for {} {}", attempt, kind, source);
        let metadata = match kind {
            SourceKind::Doi => self.doi.extract_doi_metadata(source).await?,
            SourceKind::Url => self.url.extract_url_metadata(source).await?,
        };

        if !metadata.has_meaningful_content() {
            return Err(ExtractionError::NoMeaningfulMetadata(source.to_string()));
        }
        Ok(metadata)
    }

    fn accept(&self, metadata: ReferenceMetadata) -> Result<ReferenceMetadata, ExtractionError> {
        let threshold = self.config.min_confidence_threshold;
        if metadata.confidence < threshold {
            return Err(ExtractionError::LowConfidence {
                confidence: metadata.confidence,
                threshold,
            });
        }
        Ok(metadata)
    }
}

/// Resolves citation sources into reference metadata
#[derive(Debug)]
pub struct MetadataExtractor {
    engine: Arc<Engine>,
    cache: ResponseCache<ExtractionResult>,
    debounce: DebounceManager<ExtractionResult, ExtractionError>,
    metrics: Arc<MetricsCollector>,
}

impl MetadataExtractor {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, SourceError> {
        let engine = Engine {
            doi: DoiExtractor::new(&config.crossref, &config.extraction)?,
            url: UrlExtractor::new(&config.extraction)?,
            config: config.extraction.clone(),
            error_handling: config.error_handling.clone(),
            cancel: CancellationToken::new(),
        };

        let metrics = Arc::new(MetricsCollector::new(Arc::clone(&clock)));
        Ok(Self {
            engine: Arc::new(engine),
            cache: ResponseCache::new(config.cache.clone(), clock),
            debounce: DebounceManager::new(config.debounce.clone()).with_metrics(Arc::clone(&metrics)),
            metrics,
        })
    }

    /// Resolve one source
    pub async fn extract_metadata(&self, request: &ExtractionRequest) -> ExtractionResult {
        let kind = request.kind.map(|k| k.to_string()).unwrap_or_default();
        let key = cache_key("extract", &request.source, &kind);

        if let Some(mut cached) = self.cache.get_cached_response(&key) {
            tracing::debug!("Cache hit for {}", request.source);
            self.metrics.record_cache_hit();
            cached.extraction_time = 1;
            return cached;
        }
        self.metrics.record_cache_miss();

        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let task_request = request.clone();
        let settled = self
            .debounce
            .debounced_request(
                &key,
                move || async move { Ok(engine.run(&task_request).await) },
                false,
            )
            .await;
        self.metrics.update_average_response_time(started.elapsed());

        let elapsed = started.elapsed().as_millis() as u64;
        match settled {
            Ok(result) => {
                self.cache.cache_response(&key, result.clone());
                result
            }
            Err(DebounceError::Failed(e)) => ExtractionResult::failed(&request.source, e.to_string(), elapsed),
            Err(e) => {
                tracing::warn!("Extraction for {} did not complete: {}", request.source, e);
                ExtractionResult::failed(&request.source, ExtractionError::Cancelled.to_string(), elapsed)
            }
        }
    }

    /// Resolve many sources, at most `batch_concurrency` at a time
    ///
    /// Results come back in request order, one per request.
    pub async fn extract_multiple_metadata(
        &self,
        requests: &[ExtractionRequest],
    ) -> Vec<ExtractionResult> {
        let concurrency = self.engine.config.batch_concurrency.max(1);
        stream::iter(requests)
            .map(|request| self.extract_metadata(request))
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Check the format of `source` without fetching anything
    pub fn validate_source(&self, source: &str, kind: Option<SourceKind>) -> SourceValidation {
        let checked = match kind {
            Some(SourceKind::Doi) => validate_doi(source).map(|_| SourceKind::Doi),
            Some(SourceKind::Url) => self.engine.url.check_url(source).map(|_| SourceKind::Url),
            None => match self.engine.detect(source) {
                Ok(SourceKind::Url) => self.engine.url.check_url(source).map(|_| SourceKind::Url),
                Ok(kind) => Ok(kind),
                Err(e) => {
                    return SourceValidation {
                        is_valid: false,
                        detected_type: None,
                        error: Some(e.to_string()),
                    }
                }
            },
        };

        match checked {
            Ok(kind) => SourceValidation {
                is_valid: true,
                detected_type: Some(kind),
                error: None,
            },
            Err(e) => SourceValidation {
                is_valid: false,
                detected_type: match &e {
                    ValidationError::PrivateUrl(_) => Some(SourceKind::Url),
                    _ => kind,
                },
                error: Some(e.to_string()),
            },
        }
    }

    /// Whether the DOI resolver answers for `doi`
    pub async fn check_doi_accessibility(&self, doi: &str) -> bool {
        self.engine.doi.check_doi_accessibility(doi).await
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Abort in-flight retries and reject coalesced waiters
    pub fn shutdown(&self) {
        self.engine.cancel.cancel();
        self.debounce.cancel_pending_requests();
    }
}
