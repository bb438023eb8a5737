//! Scraping search client.
//!
//! Each search goes through the response cache, then the debounce layer,
//! then the rate limiter, and only then out to the network. Pages are read
//! with the primary parser first; a page with no structured results either
//! says so explicitly (an empty result) or is handed to the alternative
//! parser. Remote failures never escape: once retries are exhausted, or the
//! limiter denies the request, the [`FallbackCoordinator`] takes over.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::parse::{
    has_no_results_indicator, is_blocked_page, AlternativeParser, PrimaryParser, ResultParser,
};
use super::{FallbackCoordinator, SourceError, SourceRegistry};
use crate::config::{Config, ErrorHandlingConfig, ScholarConfig};
use crate::models::{ScholarResult, SearchOptions};
use crate::utils::{
    cache_key, system_clock, with_retry, CacheStats, Cacheable, CircuitState, Clock,
    DebounceError, DebounceManager, HttpClient, Metrics, MetricsCollector, RateLimitDecision,
    RateLimitStatus, RateLimiter, ResponseCache, RetryConfig, BROWSER_USER_AGENT,
};

/// Where the results of a search came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum ResultOrigin {
    /// Structured parse of the search page
    Primary,
    /// Title-like links salvaged from an unstructured page
    AlternativeParse,
    /// Served from the response cache
    Cache,
    /// Returned by the named fallback source
    Fallback(String),
    /// Synthetic stand-in; every fallback source failed
    Placeholder,
    /// No results, either genuinely or after a failure with fallback disabled
    Empty,
}

/// Results of a search together with their provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<ScholarResult>,
    pub origin: ResultOrigin,
    /// User-facing description of the failure that led to a degraded outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn new(results: Vec<ScholarResult>, origin: ResultOrigin) -> Self {
        Self {
            results,
            origin,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            results: Vec::new(),
            origin: ResultOrigin::Empty,
            error: Some(message),
        }
    }

    /// Whether the results may be trusted as real data
    pub fn is_provisional(&self) -> bool {
        self.origin == ResultOrigin::Placeholder
    }
}

/// Only first-hand answers are cached; degraded outcomes are retried next time.
impl Cacheable for SearchOutcome {
    fn is_cacheable(&self) -> bool {
        self.error.is_none()
            && matches!(
                self.origin,
                ResultOrigin::Primary | ResultOrigin::AlternativeParse | ResultOrigin::Empty
            )
    }
}

/// Result of a lightweight probe of the search surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub success: bool,
    /// Milliseconds until the response (or failure) arrived
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Availability of the primary surface and its safety nets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub available: bool,
    pub circuit_state: CircuitState,
    pub fallback_enabled: bool,
    pub fallback_sources: Vec<String>,
    pub cache: CacheStats,
    pub pending_requests: usize,
}

/// Composite status returned by [`ScholarClient::get_client_status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub rate_limit_status: RateLimitStatus,
    pub service_status: ServiceStatus,
    pub error_handling: ErrorHandlingConfig,
}

/// The parts of the client a coalesced execution needs, shared by `Arc`
#[derive(Debug)]
struct Pipeline {
    http: HttpClient,
    config: ScholarConfig,
    error_handling: ErrorHandlingConfig,
    limiter: RateLimiter,
    fallback: FallbackCoordinator,
    primary: Box<dyn ResultParser>,
    alternative: Box<dyn ResultParser>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn search_url(&self, query: &str, options: &SearchOptions) -> String {
        let mut url = format!(
            "{}/scholar?q={}&hl={}&num={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            urlencoding::encode(options.language.as_deref().unwrap_or("en")),
            options.max_results
        );
        if let Some(from) = options.year_from {
            url.push_str(&format!("&as_ylo={}", from));
        }
        if let Some(to) = options.year_to {
            url.push_str(&format!("&as_yhi={}", to));
        }
        url
    }

    /// Run one search end to end; only cancellation is returned as an error
    async fn execute(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchOutcome, SourceError> {
        let url = self.search_url(query, options);

        let pipeline = self;
        let target = url.as_str();
        let fetched = with_retry(self.retry, &self.cancel, move |attempt| {
            pipeline.fetch(target, attempt)
        })
        .await;

        let failure = match fetched {
            Ok(html) => match self.parse_page(&html, query) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            },
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => e,
        };

        self.degrade(query, options, failure).await
    }

    /// A single attempt, accounted against the limiter
    async fn fetch(&self, url: &str, attempt: u32) -> Result<String, SourceError> {
        if let RateLimitDecision::Deny {
            reason,
            retry_after,
        } = self.limiter.check_and_record()
        {
            tracing::debug!("Search request denied: {} (retry after {:?})", reason, retry_after);
            return Err(SourceError::RateLimit(format!(
                "{}, retry after {}ms",
                reason,
                retry_after.as_millis()
            )));
        }

        tracing::debug!("Search attempt {}: {}", attempt, url);
        let result = self.request(url).await;

        match &result {
            Ok(_) => self.limiter.record_success(),
            Err(e) => {
                let outcome = self.limiter.record_failure(e);
                if outcome.breaker_opened {
                    tracing::warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        outcome.consecutive_failures
                    );
                }
            }
        }
        result
    }

    async fn request(&self, url: &str) -> Result<String, SourceError> {
        let response = self.http.get(url).timeout(self.request_timeout()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, "Search page"));
        }
        let body = response.text().await?;
        if is_blocked_page(&body) {
            return Err(SourceError::Blocked(
                "search page returned a robot check".to_string(),
            ));
        }
        Ok(body)
    }

    fn parse_page(&self, html: &str, query: &str) -> Result<SearchOutcome, SourceError> {
        let results = self.primary.parse(html, query);
        if !results.is_empty() {
            tracing::debug!("{} parser found {} results", self.primary.name(), results.len());
            return Ok(SearchOutcome::new(results, ResultOrigin::Primary));
        }

        if has_no_results_indicator(html) {
            tracing::debug!("No results for {:?}", query);
            return Ok(SearchOutcome::new(Vec::new(), ResultOrigin::Empty));
        }

        let results = self.alternative.parse(html, query);
        if !results.is_empty() {
            tracing::info!(
                "{} parser salvaged {} results for {:?}",
                self.alternative.name(),
                results.len(),
                query
            );
            return Ok(SearchOutcome::new(results, ResultOrigin::AlternativeParse));
        }

        Err(SourceError::Parse(
            "no results could be extracted from the search page".to_string(),
        ))
    }

    async fn degrade(
        &self,
        query: &str,
        options: &SearchOptions,
        error: SourceError,
    ) -> Result<SearchOutcome, SourceError> {
        let message = self.error_handling.render(error.kind_key(), &error.to_string());
        if self.error_handling.enable_detailed_logging {
            tracing::debug!(?error, query, "Primary search failed");
        }

        if !self.fallback.is_enabled() {
            tracing::warn!("Search for {:?} failed and fallback is disabled: {}", query, error);
            return Ok(SearchOutcome::failed(message));
        }

        tracing::warn!("Search for {:?} failed, trying fallback sources: {}", query, error);
        let mut outcome = self.fallback.run(query, options, &self.cancel).await?;
        outcome.error = Some(message);
        Ok(outcome)
    }
}

/// Search client for the scraped search surface
#[derive(Debug)]
pub struct ScholarClient {
    pipeline: Arc<Pipeline>,
    cache: ResponseCache<SearchOutcome>,
    debounce: DebounceManager<SearchOutcome, SourceError>,
    metrics: Arc<MetricsCollector>,
}

impl ScholarClient {
    /// Create a client with the built-in fallback sources
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let cancel = CancellationToken::new();
        let registry = SourceRegistry::from_config(config, &cancel)?;
        Self::assemble(config, registry, system_clock(), cancel)
    }

    /// Create a client with explicit fallback sources and clock
    pub fn with_registry(
        config: &Config,
        registry: SourceRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Self::assemble(config, registry, clock, CancellationToken::new())
    }

    fn assemble(
        config: &Config,
        registry: SourceRegistry,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let user_agent = config
            .scholar
            .user_agent
            .as_deref()
            .unwrap_or(BROWSER_USER_AGENT);
        let limits = &config.rate_limits;
        let retry = RetryConfig {
            max_attempts: limits.max_retries + 1,
            initial_delay: Duration::from_millis(limits.base_delay_ms),
            max_delay: Duration::from_millis(limits.max_delay_ms),
            backoff_multiplier: limits.backoff_multiplier,
            attempt_timeout: Duration::from_millis(config.scholar.request_timeout_ms)
                + Duration::from_secs(1),
        };

        let pipeline = Pipeline {
            http: HttpClient::with_user_agent(user_agent)?,
            config: config.scholar.clone(),
            error_handling: config.error_handling.clone(),
            limiter: RateLimiter::new(limits.clone(), Arc::clone(&clock)),
            fallback: FallbackCoordinator::new(config.fallback.clone(), &registry),
            primary: Box::new(PrimaryParser),
            alternative: Box::new(AlternativeParser),
            retry,
            cancel,
        };

        let metrics = Arc::new(MetricsCollector::new(Arc::clone(&clock)));
        Ok(Self {
            pipeline: Arc::new(pipeline),
            cache: ResponseCache::new(config.cache.clone(), clock),
            debounce: DebounceManager::new(config.debounce.clone()).with_metrics(Arc::clone(&metrics)),
            metrics,
        })
    }

    /// Search and return only the results
    ///
    /// Results may be provisional; use [`search_with_outcome`](Self::search_with_outcome)
    /// to tell them apart.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Vec<ScholarResult> {
        self.search_with_outcome(query, options).await.results
    }

    /// Search and report where the results came from
    pub async fn search_with_outcome(&self, query: &str, options: &SearchOptions) -> SearchOutcome {
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if query.is_empty() {
            let error = SourceError::InvalidRequest("query must not be empty".to_string());
            return SearchOutcome::failed(self.render(&error));
        }

        let mut options = options.clone();
        let limit = options
            .max_results
            .clamp(1, self.pipeline.config.max_results_per_page.max(1));
        if limit != options.max_results {
            tracing::debug!("Clamped max_results {} to {}", options.max_results, limit);
            options.max_results = limit;
            self.metrics.increment_context_optimizations();
        }

        let key = cache_key("search", &query, &options.fingerprint());
        if options.bypass_cache {
            self.metrics.increment_total_requests();
        } else if let Some(mut cached) = self.cache.get_cached_response(&key) {
            tracing::debug!("Cache hit for {:?}", query);
            self.metrics.record_cache_hit();
            cached.origin = ResultOrigin::Cache;
            return cached;
        } else {
            self.metrics.record_cache_miss();
        }

        let started = Instant::now();
        let pipeline = Arc::clone(&self.pipeline);
        let task_query = query.clone();
        let task_options = options.clone();
        let settled = self
            .debounce
            .debounced_request(
                &key,
                move || async move { pipeline.execute(&task_query, &task_options).await },
                options.force_immediate,
            )
            .await;
        self.metrics.update_average_response_time(started.elapsed());

        match settled {
            Ok(outcome) => {
                self.cache.cache_response(&key, outcome.clone());
                outcome
            }
            Err(DebounceError::Failed(e)) => SearchOutcome::failed(self.render(&e)),
            Err(e) => {
                tracing::warn!("Search for {:?} did not complete: {}", query, e);
                SearchOutcome::failed(self.render(&SourceError::Cancelled))
            }
        }
    }

    fn render(&self, error: &SourceError) -> String {
        self.pipeline
            .error_handling
            .render(error.kind_key(), &error.to_string())
    }

    /// Probe the search surface with a minimal query
    pub async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        if let RateLimitDecision::Deny { reason, .. } = self.pipeline.limiter.check_and_record() {
            return ConnectionTest {
                success: false,
                response_time: elapsed(started),
                status_code: None,
                error: Some(reason.to_string()),
            };
        }

        let url = self
            .pipeline
            .search_url("test", &SearchOptions::new().max_results(1));
        let response = self
            .pipeline
            .http
            .get(&url)
            .timeout(self.pipeline.request_timeout())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                ConnectionTest {
                    success: status.is_success(),
                    response_time: elapsed(started),
                    status_code: Some(status.as_u16()),
                    error: (!status.is_success())
                        .then(|| SourceError::from_status(status, "Search page").to_string()),
                }
            }
            Err(e) => ConnectionTest {
                success: false,
                response_time: elapsed(started),
                status_code: None,
                error: Some(SourceError::from(e).to_string()),
            },
        }
    }

    /// Rate limiter, availability and error-handling view
    pub fn get_client_status(&self) -> ClientStatus {
        let pipeline = &self.pipeline;
        ClientStatus {
            rate_limit_status: pipeline.limiter.status(),
            service_status: ServiceStatus {
                available: pipeline.limiter.is_service_available(),
                circuit_state: pipeline.limiter.circuit_state(),
                fallback_enabled: pipeline.fallback.is_enabled(),
                fallback_sources: pipeline.fallback.source_ids(),
                cache: self.cache.stats(),
                pending_requests: self.debounce.pending_count(),
            },
            error_handling: pipeline.error_handling.clone(),
        }
    }

    /// Clear limiter state and cached responses
    pub fn reset_client_state(&self) {
        self.pipeline.limiter.reset();
        self.cache.clear();
        tracing::info!("Search client state reset");
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Abort in-flight retries and reject coalesced waiters
    pub fn shutdown(&self) {
        self.pipeline.cancel.cancel();
        self.debounce.cancel_pending_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::make_result;
    use crate::sources::MockSource;
    use crate::utils::SystemClock;
    use mockito::{Matcher, Server};

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <div class="gs_r"><div class="gs_ri">
            <h3 class="gs_rt"><a href="https://doi.org/10.1038/nature14539">Deep learning</a></h3>
            <div class="gs_a">Y LeCun, Y Bengio, G Hinton - Nature, 2015 - nature.com</div>
            <div class="gs_rs">Deep learning allows computational models composed of multiple processing layers.</div>
          </div></div>
        </body></html>
    "#;

    const NO_RESULTS_PAGE: &str =
        "<html><body><p>Your search - zzqx - did not match any articles.</p></body></html>";

    const LINKS_PAGE: &str = r#"
        <html><body>
          <a href="/">Home</a>
          <a href="https://example.org/paper">Representation learning for scholarly graphs</a>
        </body></html>
    "#;

    const BLOCK_PAGE: &str =
        "<html><body>Our systems have detected unusual traffic from your computer network.</body></html>";

    fn test_config(base_url: &str) -> Config {
        let mut config = Config::default();
        config.scholar.base_url = base_url.to_string();
        config.scholar.request_timeout_ms = 2_000;
        config.rate_limits.max_retries = 1;
        config.rate_limits.base_delay_ms = 10;
        config.rate_limits.max_delay_ms = 50;
        config.rate_limits.jitter_enabled = false;
        config.debounce.enabled = false;
        config.fallback.fallback_sources = vec!["mock".to_string()];
        config
    }

    fn client(config: &Config, fallback: MockSource) -> (ScholarClient, Arc<MockSource>) {
        let fallback = Arc::new(fallback);
        let mut registry = SourceRegistry::new();
        registry.register(fallback.clone());
        let client = ScholarClient::with_registry(config, registry, Arc::new(SystemClock)).unwrap();
        (client, fallback)
    }

    async fn page_mock(server: &mut mockito::ServerGuard, status: usize, body: &str, hits: usize) -> mockito::Mock {
        server
            .mock("GET", "/scholar")
            .match_query(Matcher::Any)
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_primary_results_then_cache_hit() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 200, RESULTS_PAGE, 1).await;
        let (client, fallback) = client(&test_config(&server.url()), MockSource::new("mock"));

        let first = client.search_with_outcome("deep learning", &SearchOptions::new()).await;
        assert_eq!(first.origin, ResultOrigin::Primary);
        assert_eq!(first.results.len(), 1);
        assert_eq!(first.results[0].doi.as_deref(), Some("10.1038/nature14539"));

        let second = client.search_with_outcome("  deep   learning ", &SearchOptions::new()).await;
        assert_eq!(second.origin, ResultOrigin::Cache);
        assert_eq!(second.results, first.results);

        mock.assert_async().await;
        assert_eq!(fallback.calls(), 0);

        let metrics = client.get_metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.cached_requests, 1);
        assert_eq!(metrics.cache_hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_rate_limited_response_goes_to_fallback() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 429, "slow down", 1).await;
        let (client, fallback) = client(
            &test_config(&server.url()),
            MockSource::new("mock").with_results(vec![make_result("Fallback work on graphs", "mock")]),
        );

        let outcome = client.search_with_outcome("graphs", &SearchOptions::new()).await;

        mock.assert_async().await;
        assert_eq!(outcome.origin, ResultOrigin::Fallback("mock".to_string()));
        assert_eq!(outcome.results[0].source, "mock");
        assert!(outcome.error.is_some());
        assert_eq!(fallback.calls(), 1);
        assert_eq!(client.get_client_status().rate_limit_status.consecutive_failures, 1);

        // Fallback answers are not cached
        let _ = client.search_with_outcome("graphs", &SearchOptions::new()).await;
        assert_eq!(fallback.calls(), 2);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 503, "unavailable", 2).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client.search_with_outcome("retry me", &SearchOptions::new()).await;

        mock.assert_async().await;
        assert_eq!(outcome.origin, ResultOrigin::Placeholder);
        assert!(outcome.is_provisional());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(client.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_custom_error_message_on_degraded_outcome() {
        let mut server = Server::new_async().await;
        let _mock = page_mock(&mut server, 429, "slow down", 1).await;
        let mut config = test_config(&server.url());
        config.fallback.enabled = false;
        config
            .error_handling
            .custom_error_messages
            .insert("rate_limit".to_string(), "Search is busy".to_string());
        let (client, fallback) = client(&config, MockSource::new("mock"));

        let outcome = client.search_with_outcome("busy", &SearchOptions::new()).await;

        assert_eq!(outcome.origin, ResultOrigin::Empty);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("Search is busy"));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_results_page_is_empty() {
        let mut server = Server::new_async().await;
        let _mock = page_mock(&mut server, 200, NO_RESULTS_PAGE, 1).await;
        let (client, fallback) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client.search_with_outcome("zzqx", &SearchOptions::new()).await;

        assert_eq!(outcome.origin, ResultOrigin::Empty);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error, None);
        assert_eq!(fallback.calls(), 0);
        assert_eq!(client.cache_stats().size, 1);
    }

    #[tokio::test]
    async fn test_alternative_parse() {
        let mut server = Server::new_async().await;
        let _mock = page_mock(&mut server, 200, LINKS_PAGE, 1).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client
            .search_with_outcome("scholarly graphs", &SearchOptions::new())
            .await;

        assert_eq!(outcome.origin, ResultOrigin::AlternativeParse);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].confidence, 0.2);
    }

    #[tokio::test]
    async fn test_limiter_denial_skips_network() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 200, RESULTS_PAGE, 1).await;
        let mut config = test_config(&server.url());
        config.rate_limits.requests_per_minute = 1;
        let (client, fallback) = client(
            &config,
            MockSource::new("mock").with_results(vec![make_result("From the fallback source", "mock")]),
        );

        let first = client.search_with_outcome("first query", &SearchOptions::new()).await;
        let second = client.search_with_outcome("second query", &SearchOptions::new()).await;

        mock.assert_async().await;
        assert_eq!(first.origin, ResultOrigin::Primary);
        assert_eq!(second.origin, ResultOrigin::Fallback("mock".to_string()));
        assert_eq!(fallback.calls(), 1);
        assert_eq!(client.get_client_status().rate_limit_status.remaining_minute, 0);
    }

    #[tokio::test]
    async fn test_block_page_counts_as_rate_limit() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 200, BLOCK_PAGE, 1).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client.search_with_outcome("blocked", &SearchOptions::new()).await;

        mock.assert_async().await;
        assert_eq!(outcome.origin, ResultOrigin::Placeholder);
        let status = client.get_client_status();
        assert_eq!(status.rate_limit_status.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_results_mentioning_robot_checks_are_kept() {
        let page = r#"<html><body>
            <div class="gs_r"><div class="gs_ri">
              <h3 class="gs_rt"><a href="https://example.org/kg">Optimizing automated queries over knowledge graphs</a></h3>
              <div class="gs_a">A Author - Data Journal, 2020 - example.org</div>
            </div></div>
        </body></html>"#;
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 200, page, 1).await;
        let (client, fallback) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client
            .search_with_outcome("automated queries", &SearchOptions::new())
            .await;

        mock.assert_async().await;
        assert_eq!(outcome.origin, ResultOrigin::Primary);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(fallback.calls(), 0);
        assert_eq!(client.get_client_status().rate_limit_status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_connection_probe() {
        let mut server = Server::new_async().await;
        let mock = page_mock(&mut server, 200, RESULTS_PAGE, 1).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let probe = client.test_connection().await;

        mock.assert_async().await;
        assert!(probe.success);
        assert_eq!(probe.status_code, Some(200));
        assert_eq!(probe.error, None);
    }

    #[tokio::test]
    async fn test_connection_probe_reports_status() {
        let mut server = Server::new_async().await;
        let _mock = page_mock(&mut server, 503, "down", 1).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let probe = client.test_connection().await;
        assert!(!probe.success);
        assert_eq!(probe.status_code, Some(503));
        assert!(probe.error.is_some());
    }

    #[tokio::test]
    async fn test_reset_client_state() {
        let mut server = Server::new_async().await;
        let _mock = page_mock(&mut server, 200, RESULTS_PAGE, 1).await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let _ = client.search_with_outcome("deep learning", &SearchOptions::new()).await;
        assert_eq!(client.get_client_status().rate_limit_status.requests_in_last_hour, 1);
        assert_eq!(client.cache_stats().size, 1);

        client.reset_client_state();

        let status = client.get_client_status();
        assert_eq!(status.rate_limit_status.requests_in_last_hour, 0);
        assert!(!status.rate_limit_status.is_blocked);
        assert_eq!(status.service_status.cache.size, 0);
        assert_eq!(status.service_status.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let (client, fallback) = client(&test_config("http://127.0.0.1:9"), MockSource::new("mock"));

        let outcome = client.search_with_outcome("   ", &SearchOptions::new()).await;

        assert_eq!(outcome.origin, ResultOrigin::Empty);
        assert!(outcome.error.is_some());
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_request_is_clamped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/scholar")
            .match_query(Matcher::UrlEncoded("num".into(), "20".into()))
            .with_status(200)
            .with_body(RESULTS_PAGE)
            .expect(1)
            .create_async()
            .await;
        let (client, _) = client(&test_config(&server.url()), MockSource::new("mock"));

        let outcome = client
            .search_with_outcome("deep learning", &SearchOptions::new().max_results(500))
            .await;

        mock.assert_async().await;
        assert_eq!(outcome.origin, ResultOrigin::Primary);
        assert_eq!(client.get_metrics().context_optimizations, 1);
    }

    #[test]
    fn test_search_url() {
        let (client, _) = client(&test_config("https://scholar.example.org/"), MockSource::new("mock"));
        let options = SearchOptions::new().max_results(5).years(Some(2019), Some(2021));
        assert_eq!(
            client.pipeline.search_url("graph neural networks", &options),
            "https://scholar.example.org/scholar?q=graph%20neural%20networks&hl=en&num=5&as_ylo=2019&as_yhi=2021"
        );
    }

    #[test]
    fn test_outcome_cacheability() {
        let primary = SearchOutcome::new(vec![make_result("A title", "scholar")], ResultOrigin::Primary);
        assert!(primary.is_cacheable());
        assert!(!SearchOutcome::new(Vec::new(), ResultOrigin::Placeholder).is_cacheable());
        assert!(!SearchOutcome::new(Vec::new(), ResultOrigin::Fallback("crossref".into())).is_cacheable());
        assert!(!SearchOutcome::failed("boom".to_string()).is_cacheable());
    }
}
