//! Registry of fallback search sources.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{CrossRefSource, OpenAlexSource, Source, SourceError};
use crate::config::Config;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const DOI_LOOKUP = 1 << 1;
    }
}

/// Registry of the sources available to the fallback coordinator
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in API sources.
    ///
    /// Their retry loops stop once `cancel` is cancelled.
    pub fn from_config(config: &Config, cancel: &CancellationToken) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        registry.register(Arc::new(
            CrossRefSource::new(&config.crossref)?.with_cancellation(cancel.child_token()),
        ));
        registry.register(Arc::new(
            OpenAlexSource::new(&config.openalex)?.with_cancellation(cancel.child_token()),
        ));
        Ok(registry)
    }

    /// Register a source, replacing any previous one with the same id
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id().to_string(), source);
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(id)
    }

    /// Get all source IDs, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
