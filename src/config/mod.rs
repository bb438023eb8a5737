//! Configuration management.
//!
//! Every section has working defaults, so an empty file (or no file at all)
//! is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [rate_limits]
//! requests_per_minute = 10
//! requests_per_hour = 100
//! backoff_multiplier = 2.0
//! max_retries = 3
//! base_delay_ms = 1000
//! max_delay_ms = 60000
//! jitter_enabled = true
//! failure_threshold = 3
//!
//! [fallback]
//! enabled = true
//! fallback_sources = ["crossref", "openalex"]
//! fallback_timeout_ms = 10000
//! max_fallback_attempts = 2
//!
//! [error_handling]
//! enable_detailed_logging = false
//!
//! [error_handling.custom_error_messages]
//! rate_limit = "The search service is busy, please try again shortly."
//!
//! [cache]
//! ttl_ms = 1800000
//! max_size = 100
//!
//! [debounce]
//! delay_ms = 300
//! max_wait_ms = 2000
//!
//! [extraction]
//! timeout_ms = 15000
//! retry_attempts = 2
//! min_confidence_threshold = 0.1
//! ```
//!
//! Environment variables prefixed with `CITATION_SCOUT_` override file values,
//! using `__` between section and key (e.g. `CITATION_SCOUT_RATE_LIMITS__REQUESTS_PER_MINUTE=5`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Config file name searched for in the working and config directories
pub const CONFIG_FILE_NAME: &str = "citation-scout.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CITATION_SCOUT";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Rate limiting and circuit breaker settings
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Fallback source settings
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Error reporting settings
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request coalescing settings
    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Metadata extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Scraped search surface
    #[serde(default)]
    pub scholar: ScholarConfig,

    /// Bibliographic lookup API
    #[serde(default)]
    pub crossref: CrossRefConfig,

    /// OpenAlex fallback source
    #[serde(default)]
    pub openalex: OpenAlexConfig,
}

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Retries of a single search before deferring to fallback
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_true")]
    pub jitter_enabled: bool,

    /// Consecutive quota/rate-limit failures tolerated before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_enabled: true,
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    10
}

fn default_requests_per_hour() -> u32 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Fallback source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Source ids, tried in order
    pub fallback_sources: Vec<String>,
    /// Budget for the whole fallback pass
    pub fallback_timeout_ms: u64,
    pub max_fallback_attempts: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_sources: vec!["crossref".to_string(), "openalex".to_string()],
            fallback_timeout_ms: 10_000,
            max_fallback_attempts: 2,
        }
    }
}

/// Error reporting configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// Log full failure causes and append them to custom messages
    pub enable_detailed_logging: bool,
    /// User-facing message per error kind (`rate_limit`, `network`, `not_found`, ...)
    pub custom_error_messages: HashMap<String, String>,
}

impl ErrorHandlingConfig {
    /// Render an error for a caller, honoring custom messages
    pub fn render(&self, kind: &str, technical: &str) -> String {
        match self.custom_error_messages.get(kind) {
            Some(custom) if self.enable_detailed_logging => format!("{} ({})", custom, technical),
            Some(custom) => custom.clone(),
            None => technical.to_string(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 30 * 60 * 1000,
            max_size: 100,
        }
    }
}

/// Request coalescing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub enabled: bool,
    pub delay_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 300,
            max_wait_ms: 2_000,
        }
    }
}

/// Metadata extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Per-attempt time limit
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    /// Base of the `base * 2^attempt` backoff
    pub retry_base_delay_ms: u64,
    pub fallback_to_alternate_method: bool,
    pub min_confidence_threshold: f64,
    pub batch_concurrency: usize,
    /// Time limit for DOI accessibility probes
    pub accessibility_timeout_ms: u64,
    /// Let the URL extractor fetch loopback and private-network hosts
    pub allow_private_hosts: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            retry_attempts: 2,
            retry_base_delay_ms: 1_000,
            fallback_to_alternate_method: true,
            min_confidence_threshold: 0.1,
            batch_concurrency: 5,
            accessibility_timeout_ms: 5_000,
            allow_private_hosts: false,
        }
    }
}

/// Scraped search surface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScholarConfig {
    pub base_url: String,
    /// Overrides the browser-like default user agent
    pub user_agent: Option<String>,
    pub request_timeout_ms: u64,
    /// Upper bound on results requested per page
    pub max_results_per_page: usize,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com".to_string(),
            user_agent: None,
            request_timeout_ms: 10_000,
            max_results_per_page: 20,
        }
    }
}

/// Bibliographic API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossRefConfig {
    pub base_url: String,
    /// DOI resolver used for accessibility probes and DOI→URL fallback
    pub doi_resolver: String,
    /// Contact address for the polite pool
    pub mailto: Option<String>,
}

impl Default for CrossRefConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.crossref.org".to_string(),
            doi_resolver: "https://doi.org".to_string(),
            mailto: std::env::var("CROSSREF_MAILTO").ok(),
        }
    }
}

/// OpenAlex configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAlexConfig {
    pub base_url: String,
    pub mailto: Option<String>,
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openalex.org".to_string(),
            mailto: std::env::var("OPENALEX_EMAIL").ok(),
        }
    }
}

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(environment())
        .build()?
        .try_deserialize()
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("fallback.fallback_sources")
        .try_parsing(true)
}

/// Look for a config file in the working directory, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("citation-scout").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

/// Get the default configuration with environment overrides applied
pub fn get_config() -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(environment())
        .build()?
        .try_deserialize()
}

impl Config {
    /// Render the effective configuration in config file format
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rate_limits.requests_per_minute, 10);
        assert_eq!(config.cache.ttl_ms, 1_800_000);
        assert_eq!(config.cache.max_size, 100);
        assert_eq!(config.debounce.delay_ms, 300);
        assert_eq!(config.debounce.max_wait_ms, 2_000);
        assert_eq!(config.extraction.timeout_ms, 15_000);
        assert_eq!(config.extraction.retry_attempts, 2);
        assert_eq!(config.extraction.batch_concurrency, 5);
        assert!(config.fallback.enabled);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[rate_limits]
requests_per_minute = 4

[fallback]
fallback_sources = ["openalex"]

[error_handling.custom_error_messages]
rate_limit = "busy"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.rate_limits.requests_per_minute, 4);
        assert_eq!(config.rate_limits.requests_per_hour, 100);
        assert_eq!(config.fallback.fallback_sources, vec!["openalex".to_string()]);
        assert_eq!(config.fallback.max_fallback_attempts, 2);
        assert_eq!(
            config.error_handling.custom_error_messages.get("rate_limit"),
            Some(&"busy".to_string())
        );
    }

    #[test]
    fn test_render_error_messages() {
        let mut handling = ErrorHandlingConfig::default();
        assert_eq!(handling.render("network", "connection reset"), "connection reset");

        handling
            .custom_error_messages
            .insert("network".to_string(), "Service unreachable".to_string());
        assert_eq!(handling.render("network", "connection reset"), "Service unreachable");

        handling.enable_detailed_logging = true;
        assert_eq!(
            handling.render("network", "connection reset"),
            "Service unreachable (connection reset)"
        );
    }

    #[test]
    fn test_get_config_applies_environment() {
        std::env::set_var("CITATION_SCOUT_DEBOUNCE__MAX_WAIT_MS", "1234");
        let config = get_config();
        std::env::remove_var("CITATION_SCOUT_DEBOUNCE__MAX_WAIT_MS");

        let config = config.unwrap();
        assert_eq!(config.debounce.max_wait_ms, 1234);
        assert_eq!(config.debounce.delay_ms, 300);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let mut config = Config::default();
        config.rate_limits.requests_per_minute = 7;
        config.fallback.fallback_sources = vec!["openalex".to_string()];
        config.extraction.allow_private_hosts = true;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", config.to_toml().unwrap()).unwrap();

        let loaded = load_config(file.path()).unwrap();
        assert_eq!(loaded.rate_limits.requests_per_minute, 7);
        assert_eq!(loaded.fallback.fallback_sources, vec!["openalex".to_string()]);
        assert!(loaded.extraction.allow_private_hosts);
        assert_eq!(loaded.cache, config.cache);
    }
}
