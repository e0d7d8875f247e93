//! DuckDuckGo instant-answer search backend.
//!
//! Privacy-first: queries go directly to DuckDuckGo and need no API key.
//! The instant-answer API returns an abstract plus related topics, which are
//! flattened into ordered [`SearchHit`]s.

use super::SearchBackend;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::types::SearchHit;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const API_URL: &str = "https://api.duckduckgo.com/";

/// Search backend over the DuckDuckGo instant-answer JSON API.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SearchError::Request {
                query: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            max_results: config.max_results,
        })
    }

    /// Convert an instant-answer response body into hits, abstract first.
    fn parse_hits(body: &Value, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();

        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let url = body.get("AbstractURL").and_then(|v| v.as_str()).unwrap_or("");
            let title = body
                .get("Heading")
                .and_then(|v| v.as_str())
                .filter(|h| !h.is_empty())
                .or_else(|| body.get("AbstractSource").and_then(|v| v.as_str()))
                .unwrap_or("Untitled");
            if !url.is_empty() {
                hits.push(SearchHit::new(url, title, abstract_text));
            }
        }

        let mut topics = Vec::new();
        for key in ["Results", "RelatedTopics"] {
            if let Some(entries) = body.get(key).and_then(|v| v.as_array()) {
                flatten_topics(entries, &mut topics);
            }
        }

        for topic in topics {
            if hits.len() >= max_results {
                break;
            }
            let (Some(text), Some(url)) = (
                topic.get("Text").and_then(|v| v.as_str()),
                topic.get("FirstURL").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            if text.is_empty() || url.is_empty() {
                continue;
            }
            let title = text.split(" - ").next().unwrap_or(text).trim();
            hits.push(SearchHit::new(url, title, text));
        }

        hits.truncate(max_results);
        hits
    }
}

/// Related topics may be grouped under a `Topics` array; flatten one level.
fn flatten_topics<'a>(entries: &'a [Value], out: &mut Vec<&'a Value>) {
    for entry in entries {
        match entry.get("Topics").and_then(|v| v.as_array()) {
            Some(nested) => out.extend(nested.iter()),
            None => out.push(entry),
        }
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            API_URL,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                query: query.to_string(),
                message: format!("Search request failed: {}", e),
            })?;

        let body: Value = response.json().await.map_err(|e| SearchError::ResponseParse {
            query: query.to_string(),
            message: format!("Failed to parse search response: {}", e),
        })?;

        let hits = Self::parse_hits(&body, self.max_results);
        debug!(query, hits = hits.len(), "DuckDuckGo search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}
