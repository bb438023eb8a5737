//! Utility modules supporting the retrieval pipeline.
//!
//! - [`ResponseCache`]: bounded, TTL-based cache that only stores successes
//! - [`DebounceManager`]: coalesces concurrent identical requests
//! - [`MetricsCollector`]: running request counters and latency mean
//! - [`RateLimiter`]: sliding-window quotas plus a failure-driven circuit breaker
//! - [`with_retry`]: exponential backoff with per-attempt timeouts and cancellation
//! - [`HttpClient`]: shared reqwest client
//! - [`Clock`]: injectable wall clock for deterministic tests
//! - Validators for DOIs and public http(s) URLs
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use citation_scout::sources::SourceError;
//! use citation_scout::utils::{with_retry, RetryConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let cancel = CancellationToken::new();
//! let config = RetryConfig::default().max_attempts(3);
//! let data = with_retry(config, &cancel, |_attempt| fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod clock;
mod debounce;
mod http;
mod metrics;
mod rate_limiter;
mod retry;
mod validate;

pub use cache::{cache_key, CacheEntry, CacheStats, Cacheable, ResponseCache};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use debounce::{DebounceError, DebounceManager};
pub use http::{HttpClient, BROWSER_USER_AGENT};
pub use metrics::{Metrics, MetricsCollector};
pub use rate_limiter::{
    CircuitState, DenyReason, FailureKind, FailureOutcome, RateLimitDecision,
    RateLimitStatus, RateLimiter,
};
pub use retry::{with_retry, RetryConfig, RetryableError};
pub use validate::{
    find_doi, is_valid_doi, normalize_doi, validate_doi, validate_url, ValidationError,
};
