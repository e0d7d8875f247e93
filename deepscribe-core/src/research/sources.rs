//! Source registry: URL canonicalization, dedup and credibility scoring.
//!
//! Every search hit passes through [`SourceRegistry::admit`], which canonicalizes
//! the URL and inserts a [`SourceRecord`] only if the canonical form is unseen.
//! The lookup and insert happen under one lock, so concurrent ingestion can never
//! produce two records for the same canonical URL.

use crate::types::{SearchHit, truncate_chars};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// Social-media and shopping domains whose pages make poor research sources.
const LOW_VALUE_DOMAINS: &[&str] = &[
    "pinterest.com",
    "instagram.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "tiktok.com",
    "reddit.com",
    "quora.com",
    "linkedin.com",
    "amazon.com",
    "ebay.com",
    "etsy.com",
    "walmart.com",
    "target.com",
];

/// Reference works and publishers that start with a raised credibility.
const REFERENCE_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "britannica.com",
    "nature.com",
    "science.org",
    "sciencedirect.com",
    "springer.com",
    "arxiv.org",
    "ieee.org",
    "acm.org",
    "who.int",
    "reuters.com",
    "apnews.com",
];

/// Maximum characters kept from a hit's content.
pub const EXCERPT_CHARS: usize = 2_000;

/// Stable identity of a source within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u32);

impl SourceId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Reliability rating attached to extracted learnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl Reliability {
    pub fn score(&self) -> f64 {
        match self {
            Reliability::High => 0.9,
            Reliability::Medium => 0.6,
            Reliability::Low => 0.3,
        }
    }

    /// Lenient parse of a model-supplied rating.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "HIGH" => Some(Reliability::High),
            "MEDIUM" | "MODERATE" => Some(Reliability::Medium),
            "LOW" => Some(Reliability::Low),
            _ => None,
        }
    }
}

/// A unique source discovered during research.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    /// URL as returned by the search backend.
    pub url: String,
    /// Dedup key.
    pub canonical_url: String,
    pub title: String,
    pub content_excerpt: String,
    /// 0.0-1.0; the only field refined after creation.
    pub credibility_score: f64,
    pub first_seen_depth: u32,
    /// Query that first surfaced this source.
    pub discovered_via: String,
}

impl SourceRecord {
    /// Host without a leading `www.`, or the raw URL if it has no host.
    pub fn domain(&self) -> &str {
        domain_of(&self.canonical_url).unwrap_or(&self.url)
    }
}

/// Why a hit was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not an absolute http(s) URL.
    InvalidUrl,
    /// Social-media or shopping domain.
    LowValueDomain,
}

/// Outcome of offering a hit to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    New(SourceRecord),
    Duplicate(SourceId),
    Rejected(RejectReason),
}

/// Normalize a URL for dedup comparison.
///
/// Lowercases scheme and host, drops default ports, the fragment and trailing
/// slashes on the path. The query string is kept verbatim. Returns `None` for
/// anything that is not an absolute http(s) URL.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }

    let mut canonical = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{port}"));
    }
    canonical.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        canonical.push('?');
        canonical.push_str(query);
    }
    Some(canonical)
}

/// Host of a URL with any leading `www.` removed.
pub fn domain_of(url: &str) -> Option<&str> {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest)?;
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .filter(|h| !h.is_empty())?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    Some(host.strip_prefix("www.").unwrap_or(host))
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether a canonical URL points at a domain worth ingesting.
pub fn is_relevant_url(canonical_url: &str) -> bool {
    match domain_of(canonical_url) {
        Some(host) => !LOW_VALUE_DOMAINS.iter().any(|d| domain_matches(host, d)),
        None => false,
    }
}

/// Starting credibility from the domain alone.
pub fn initial_credibility(canonical_url: &str) -> f64 {
    let Some(host) = domain_of(canonical_url) else {
        return 0.5;
    };
    let tld = host.rsplit('.').next().unwrap_or_default();
    if matches!(tld, "gov" | "edu" | "mil") || host.contains(".gov.") || host.contains(".ac.") {
        0.9
    } else if REFERENCE_DOMAINS.iter().any(|d| domain_matches(host, d)) {
        0.8
    } else if tld == "org" {
        0.65
    } else {
        0.5
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_canonical: HashMap<String, SourceId>,
    records: Vec<SourceRecord>,
}

/// Run-wide registry of unique sources, safe to share across tasks.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    inner: Mutex<RegistryInner>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a search hit. Creates a record only for an unseen, relevant URL.
    pub fn admit(&self, hit: &SearchHit, depth: u32, query: &str) -> Admission {
        let Some(canonical) = canonicalize_url(&hit.url) else {
            return Admission::Rejected(RejectReason::InvalidUrl);
        };
        if !is_relevant_url(&canonical) {
            return Admission::Rejected(RejectReason::LowValueDomain);
        }

        let mut inner = self.lock();
        if let Some(id) = inner.by_canonical.get(&canonical) {
            return Admission::Duplicate(*id);
        }

        let id = SourceId::new(inner.records.len() as u32 + 1);
        let title = match hit.title.trim() {
            "" => domain_of(&canonical).unwrap_or("Untitled").to_string(),
            t => t.to_string(),
        };
        let record = SourceRecord {
            id,
            url: hit.url.trim().to_string(),
            credibility_score: initial_credibility(&canonical),
            canonical_url: canonical.clone(),
            title,
            content_excerpt: truncate_chars(hit.content().trim(), EXCERPT_CHARS).to_string(),
            first_seen_depth: depth,
            discovered_via: query.to_string(),
        };
        inner.by_canonical.insert(canonical, id);
        inner.records.push(record.clone());
        Admission::New(record)
    }

    /// Blend a reliability rating into a source's credibility score.
    ///
    /// Returns the new score, or `None` for an unknown id.
    pub fn refine_credibility(&self, id: SourceId, rating: Reliability) -> Option<f64> {
        let mut inner = self.lock();
        let index = (id.get() as usize).checked_sub(1)?;
        let record = inner.records.get_mut(index)?;
        record.credibility_score = ((record.credibility_score + rating.score()) / 2.0).clamp(0.0, 1.0);
        Some(record.credibility_score)
    }

    pub fn get(&self, id: SourceId) -> Option<SourceRecord> {
        let index = (id.get() as usize).checked_sub(1)?;
        self.lock().records.get(index).cloned()
    }

    /// Look up a source by any URL that canonicalizes to the same key.
    pub fn find_by_url(&self, url: &str) -> Option<SourceRecord> {
        let canonical = canonicalize_url(url)?;
        let inner = self.lock();
        let id = inner.by_canonical.get(&canonical)?;
        inner.records.get(id.get() as usize - 1).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in id order.
    pub fn snapshot(&self) -> Vec<SourceRecord> {
        self.lock().records.clone()
    }

    /// All records keyed by canonical URL.
    pub fn by_canonical_url(&self) -> BTreeMap<String, SourceRecord> {
        self.lock()
            .records
            .iter()
            .map(|r| (r.canonical_url.clone(), r.clone()))
            .collect()
    }
}
