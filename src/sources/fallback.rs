//! Fallback coordination across alternate search sources.
//!
//! Sources are tried in configured order, at most `max_fallback_attempts`
//! of them, all within one `fallback_timeout_ms` budget. The first source
//! returning data wins. When every source fails or comes back empty the
//! coordinator still answers with a single provisional placeholder, so
//! callers must check [`ResultOrigin`] before trusting a non-empty list.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::parse::query_terms;
use super::{ResultOrigin, SearchOutcome, Source, SourceError, SourceRegistry};
use crate::config::FallbackConfig;
use crate::models::{ScholarResult, ScholarResultBuilder, SearchOptions};

/// Confidence of the synthetic result returned when every source failed
pub const PLACEHOLDER_CONFIDENCE: f64 = 0.1;

/// Titles at least this similar are treated as the same work
const DUPLICATE_TITLE_SIMILARITY: f64 = 0.92;

/// Runs configured fallback sources in order
#[derive(Debug, Clone)]
pub struct FallbackCoordinator {
    sources: Vec<Arc<dyn Source>>,
    config: FallbackConfig,
}

impl FallbackCoordinator {
    /// Resolve the configured source ids against `registry`
    ///
    /// Unknown ids are skipped with a warning and do not use up an attempt.
    pub fn new(config: FallbackConfig, registry: &SourceRegistry) -> Self {
        let sources = config
            .fallback_sources
            .iter()
            .filter_map(|id| match registry.get(id) {
                Some(source) if source.supports_search() => Some(Arc::clone(source)),
                Some(_) => {
                    tracing::warn!("Fallback source '{}' does not support search, skipping", id);
                    None
                }
                None => {
                    tracing::warn!("Unknown fallback source '{}', skipping", id);
                    None
                }
            })
            .collect();

        Self { sources, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Ids of the resolved sources, in the order they are tried
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    /// Try the fallback sources for `query`
    ///
    /// Only cancellation is reported as an error; every other failure ends
    /// in the placeholder outcome.
    pub async fn run(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SourceError> {
        let budget = Duration::from_millis(self.config.fallback_timeout_ms);

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = tokio::time::timeout(budget, self.first_with_data(query, options)) => result,
        };

        match attempt {
            Ok(Some((source, results))) => {
                tracing::info!(
                    "Fallback source '{}' returned {} results for {:?}",
                    source,
                    results.len(),
                    query
                );
                Ok(SearchOutcome::new(results, ResultOrigin::Fallback(source)))
            }
            Ok(None) => {
                tracing::warn!("All fallback sources failed for {:?}, returning placeholder", query);
                Ok(Self::placeholder(query))
            }
            Err(_) => {
                tracing::warn!(
                    "Fallback exceeded {:?} for {:?}, returning placeholder",
                    budget,
                    query
                );
                Ok(Self::placeholder(query))
            }
        }
    }

    async fn first_with_data(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Option<(String, Vec<ScholarResult>)> {
        for source in self.sources.iter().take(self.config.max_fallback_attempts) {
            match source.search(query, options).await {
                Ok(results) if !results.is_empty() => {
                    let mut results = dedupe(results);
                    results.truncate(options.max_results);
                    return Some((source.id().to_string(), results));
                }
                Ok(_) => tracing::debug!("Fallback source '{}' returned no results", source.id()),
                Err(e) => tracing::warn!("Fallback source '{}' failed: {}", source.id(), e),
            }
        }
        None
    }

    /// The low-confidence stand-in returned when no source produced data
    pub fn placeholder(query: &str) -> SearchOutcome {
        let result = ScholarResultBuilder::new(
            format!("Search results for \"{}\" are temporarily unavailable", query),
            "fallback",
        )
        .keywords(query_terms(query))
        .confidence(PLACEHOLDER_CONFIDENCE)
        .relevance_score(0.0)
        .build();

        SearchOutcome::new(vec![result], ResultOrigin::Placeholder)
    }
}

/// Drop later records that share a DOI or a near-identical title
fn dedupe(results: Vec<ScholarResult>) -> Vec<ScholarResult> {
    let mut kept: Vec<ScholarResult> = Vec::with_capacity(results.len());
    for result in results {
        let title = result.title.to_lowercase();
        let duplicate = kept.iter().any(|k| {
            let same_doi = matches!((&k.doi, &result.doi), (Some(a), Some(b)) if a.eq_ignore_ascii_case(b));
            same_doi
                || strsim::normalized_levenshtein(&k.title.to_lowercase(), &title)
                    >= DUPLICATE_TITLE_SIMILARITY
        });
        if !duplicate {
            kept.push(result);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::make_result;
    use crate::sources::MockSource;

    fn coordinator(sources: Vec<MockSource>, max_attempts: usize) -> (FallbackCoordinator, Vec<Arc<MockSource>>) {
        let sources: Vec<Arc<MockSource>> = sources.into_iter().map(Arc::new).collect();
        let mut registry = SourceRegistry::new();
        for source in &sources {
            registry.register(source.clone());
        }
        let config = FallbackConfig {
            enabled: true,
            fallback_sources: sources.iter().map(|s| s.id().to_string()).collect(),
            fallback_timeout_ms: 1_000,
            max_fallback_attempts: max_attempts,
        };
        (FallbackCoordinator::new(config, &registry), sources)
    }

    #[tokio::test]
    async fn test_first_source_with_data_wins() {
        let (coordinator, sources) = coordinator(
            vec![
                MockSource::new("a").with_error(SourceError::Network("down".into())),
                MockSource::new("b").with_results(vec![make_result("Graph theory basics", "b")]),
                MockSource::new("c").with_results(vec![make_result("Unused", "c")]),
            ],
            3,
        );

        let outcome = coordinator
            .run("graph theory", &SearchOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.origin, ResultOrigin::Fallback("b".to_string()));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(sources[2].calls(), 0);
    }

    #[tokio::test]
    async fn test_placeholder_when_all_fail() {
        let (coordinator, _) = coordinator(
            vec![
                MockSource::new("a").with_error(SourceError::Network("down".into())),
                MockSource::new("b"),
            ],
            2,
        );

        let outcome = coordinator
            .run("quantum error correction", &SearchOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.origin, ResultOrigin::Placeholder);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].confidence, PLACEHOLDER_CONFIDENCE);
        assert!(outcome.results[0].is_provisional());
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let (coordinator, sources) = coordinator(
            vec![
                MockSource::new("a"),
                MockSource::new("b"),
                MockSource::new("c").with_results(vec![make_result("Too late", "c")]),
            ],
            2,
        );

        let outcome = coordinator
            .run("anything", &SearchOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.origin, ResultOrigin::Placeholder);
        assert_eq!(sources[0].calls(), 1);
        assert_eq!(sources[1].calls(), 1);
        assert_eq!(sources[2].calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_yields_placeholder() {
        let (coordinator, _) = coordinator(
            vec![MockSource::new("slow")
                .with_delay(Duration::from_secs(30))
                .with_results(vec![make_result("Slow result", "slow")])],
            1,
        );

        let outcome = coordinator
            .run("slow query", &SearchOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.origin, ResultOrigin::Placeholder);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let (coordinator, _) = coordinator(vec![MockSource::new("a")], 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator.run("q", &SearchOptions::new(), &cancel).await;
        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[test]
    fn test_unknown_sources_are_skipped() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(MockSource::new("known")));
        let config = FallbackConfig {
            fallback_sources: vec!["missing".to_string(), "known".to_string()],
            ..FallbackConfig::default()
        };

        let coordinator = FallbackCoordinator::new(config, &registry);
        assert_eq!(coordinator.source_ids(), vec!["known"]);
    }

    #[test]
    fn test_dedupe_by_title_and_doi() {
        let mut with_doi = make_result("Completely different", "x");
        with_doi.doi = Some("10.1000/ABC".to_string());
        let mut same_doi = make_result("Another title entirely", "x");
        same_doi.doi = Some("10.1000/abc".to_string());

        let results = dedupe(vec![
            make_result("Deep Learning", "x"),
            make_result("Deep learning.", "x"),
            with_doi,
            same_doi,
        ]);

        assert_eq!(results.len(), 2);
    }
}
