//! Search backends.
//!
//! A [`SearchBackend`] turns a query into an ordered list of candidate sources.
//! "No results" is an empty list, never an error.

pub mod duckduckgo;

use crate::error::SearchError;
use crate::types::SearchHit;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

pub use duckduckgo::DuckDuckGoSearch;

/// Trait for web or local search providers.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a query and return hits in relevance order.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// An in-memory search backend for testing.
///
/// Exact-match queries return their registered hits; queries containing a
/// registered keyword fall back to that keyword's hits. Unknown queries return
/// the default hits (empty unless set).
#[derive(Default)]
pub struct MockSearchBackend {
    exact: HashMap<String, Vec<SearchHit>>,
    keywords: Vec<(String, Vec<SearchHit>)>,
    default_hits: Vec<SearchHit>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hits for an exact query.
    pub fn with_results(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.exact.insert(query.to_string(), hits);
        self
    }

    /// Register hits for any query containing `keyword` (case-insensitive).
    pub fn with_keyword(mut self, keyword: &str, hits: Vec<SearchHit>) -> Self {
        self.keywords.push((keyword.to_lowercase(), hits));
        self
    }

    /// Hits returned for queries with no registered match.
    pub fn with_default(mut self, hits: Vec<SearchHit>) -> Self {
        self.default_hits = hits;
        self
    }

    /// Make every query containing `keyword` fail.
    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.failing.insert(keyword.to_lowercase());
        self
    }

    /// Queries received so far, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SearchBackend for MockSearchBackend {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        let lower = query.to_lowercase();
        if self.failing.iter().any(|k| lower.contains(k)) {
            return Err(SearchError::Request {
                query: query.to_string(),
                message: "mock failure".to_string(),
            });
        }
        if let Some(hits) = self.exact.get(query) {
            return Ok(hits.clone());
        }
        if let Some((_, hits)) = self.keywords.iter().find(|(k, _)| lower.contains(k)) {
            return Ok(hits.clone());
        }
        Ok(self.default_hits.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_search_routing() {
        let backend = MockSearchBackend::new()
            .with_results("exact query", vec![SearchHit::new("https://a.example", "A", "a")])
            .with_keyword("battery", vec![SearchHit::new("https://b.example", "B", "b")])
            .failing_on("broken");

        assert_eq!(backend.search("exact query").await.unwrap()[0].title, "A");
        assert_eq!(
            backend.search("solid-state Battery costs").await.unwrap()[0].title,
            "B"
        );
        assert!(backend.search("unknown").await.unwrap().is_empty());
        assert!(backend.search("a broken query").await.is_err());
        assert_eq!(backend.calls().len(), 4);
    }
}
