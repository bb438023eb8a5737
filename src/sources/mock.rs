//! Mock source for testing purposes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{ScholarResult, ScholarResultBuilder, SearchOptions};
use crate::sources::{Source, SourceCapabilities, SourceError};

/// A mock source that returns a predefined response.
#[derive(Debug)]
pub struct MockSource {
    id: String,
    response: Mutex<Result<Vec<ScholarResult>, SourceError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    /// Create a mock source that returns no results
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: Mutex::new(Ok(Vec::new())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Return these results from every search
    pub fn with_results(self, results: Vec<ScholarResult>) -> Self {
        self.set_response(Ok(results));
        self
    }

    /// Fail every search with this error
    pub fn with_error(self, error: SourceError) -> Self {
        self.set_response(Err(error));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the configured response.
    pub fn set_response(&self, response: Result<Vec<ScholarResult>, SourceError>) {
        *self.response.lock().unwrap_or_else(|e| e.into_inner()) = response;
    }

    /// Number of searches issued against this source
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    async fn search(
        &self,
        _query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScholarResult>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.response.lock().unwrap_or_else(|e| e.into_inner()).clone();
        response.map(|mut results| {
            results.truncate(options.max_results);
            results
        })
    }
}

/// Helper function to create a mock result for testing.
pub fn make_result(title: &str, source: &str) -> ScholarResult {
    ScholarResultBuilder::new(title, source)
        .authors(vec!["Ada Lovelace".to_string()])
        .year(Some(2020))
        .confidence(0.7)
        .build()
}
