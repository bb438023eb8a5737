//! # Citation Scout
//!
//! Resilient scholarly search and reference metadata retrieval.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`sources`]: the scraping [`ScholarClient`](sources::ScholarClient), its
//!   HTML parsers, and the fallback sources behind the [`Source`] trait
//! - [`extract`]: the [`MetadataExtractor`](extract::MetadataExtractor) engine
//!   with its DOI and URL extractors
//! - [`models`]: search results, reference metadata and extraction requests
//! - [`utils`]: cache, debounce, metrics, rate limiter, retry and validators
//! - [`config`]: configuration management
//!
//! ## Example
//!
//! ```no_run
//! use citation_scout::config::Config;
//! use citation_scout::models::{ExtractionRequest, SearchOptions};
//! use citation_scout::{MetadataExtractor, ScholarClient};
//!
//! # async fn run() -> Result<(), citation_scout::sources::SourceError> {
//! let config = Config::default();
//!
//! let client = ScholarClient::new(&config)?;
//! let outcome = client
//!     .search_with_outcome("graph neural networks", &SearchOptions::new().max_results(5))
//!     .await;
//! if outcome.is_provisional() {
//!     println!("search is degraded: {:?}", outcome.error);
//! }
//!
//! let extractor = MetadataExtractor::new(&config)?;
//! let result = extractor
//!     .extract_metadata(&ExtractionRequest::new("10.1038/nature14539"))
//!     .await;
//! println!("{:?}", result.metadata.and_then(|m| m.title));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod extract;
pub mod models;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use extract::MetadataExtractor;
pub use sources::{ScholarClient, Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
