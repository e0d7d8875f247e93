//! Citation registry: gapless numbering of cited sources within one report.
//!
//! Numbers are handed out in registration order starting at 1 and never change.
//! Registration is serialized through a mutex so concurrent section tasks can
//! share one registry. Validation is pure text and set analysis.

use crate::research::sources::{SourceId, SourceRecord};
use crate::types::CitationStyle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// In-text markers: `[3]` or grouped `[1, 4]`.
static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("citation marker pattern is valid")
});

/// A numbered citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationEntry {
    /// 1-based, assigned at registration.
    pub numeric_id: u32,
    pub source_id: SourceId,
    /// Style-specific rendering, without the `[n]` prefix.
    pub formatted_string: String,
}

/// Result of checking in-text markers against the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationValidation {
    pub used_citation_ids: BTreeSet<u32>,
    pub registered_citation_ids: BTreeSet<u32>,
    pub correctly_used_ids: BTreeSet<u32>,
    /// Referenced ids that are 0 or above the highest registered id.
    pub out_of_range_ids_in_text: BTreeSet<u32>,
    /// Referenced ids inside the range that were never registered.
    pub unregistered_ids_in_text: BTreeSet<u32>,
    pub unused_registered_ids: BTreeSet<u32>,
}

impl CitationValidation {
    /// No marker points outside the registry.
    pub fn is_valid(&self) -> bool {
        self.out_of_range_ids_in_text.is_empty() && self.unregistered_ids_in_text.is_empty()
    }
}

/// Render a source in the given style.
pub fn format_citation(record: &SourceRecord, style: CitationStyle) -> String {
    let title = record.title.trim();
    match style {
        CitationStyle::Web => format!("*{}*, \"{}\", {}", record.domain(), title, record.url),
        CitationStyle::Apa => {
            let title = title.trim_end_matches('.');
            format!("{}. (n.d.). {}. {}", title, record.domain(), record.url)
        }
    }
}

/// Every citation id referenced by markers in `text`, in order of appearance.
///
/// Markers too large for `u32` saturate to `u32::MAX`, which no registry can
/// reach, so they always validate as out of range.
pub fn extract_citation_ids(text: &str) -> Vec<u32> {
    CITATION_MARKER
        .captures_iter(text)
        .flat_map(|caps| {
            caps[1]
                .split(',')
                .map(|n| n.trim().parse::<u32>().unwrap_or(u32::MAX))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_source: HashMap<SourceId, u32>,
    entries: Vec<CitationEntry>,
    contexts: HashMap<u32, Vec<String>>,
}

/// Single source of truth for numbered citations in one report.
#[derive(Debug)]
pub struct CitationRegistry {
    style: CitationStyle,
    inner: Mutex<RegistryInner>,
}

impl CitationRegistry {
    pub fn new(style: CitationStyle) -> Self {
        Self {
            style,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn style(&self) -> CitationStyle {
        self.style
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a source by id. Idempotent: a known source keeps its number.
    pub fn register(&self, source_id: SourceId) -> u32 {
        self.register_inner(source_id, None)
    }

    /// Register a source and render its bibliography entry.
    pub fn register_source(&self, record: &SourceRecord) -> u32 {
        self.register_inner(record.id, Some(record))
    }

    fn register_inner(&self, source_id: SourceId, record: Option<&SourceRecord>) -> u32 {
        let mut inner = self.lock();
        if let Some(&numeric_id) = inner.by_source.get(&source_id) {
            if let Some(record) = record {
                let entry = &mut inner.entries[numeric_id as usize - 1];
                if entry.formatted_string.is_empty() {
                    entry.formatted_string = format_citation(record, self.style);
                }
            }
            return numeric_id;
        }

        let numeric_id = inner.entries.len() as u32 + 1;
        inner.entries.push(CitationEntry {
            numeric_id,
            source_id,
            formatted_string: record
                .map(|r| format_citation(r, self.style))
                .unwrap_or_default(),
        });
        inner.by_source.insert(source_id, numeric_id);
        numeric_id
    }

    /// Remember a piece of text supported by citation `numeric_id`.
    pub fn record_context(&self, numeric_id: u32, context: &str) {
        self.lock()
            .contexts
            .entry(numeric_id)
            .or_default()
            .push(context.to_string());
    }

    pub fn contexts(&self, numeric_id: u32) -> Vec<String> {
        self.lock()
            .contexts
            .get(&numeric_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn numeric_id(&self, source_id: SourceId) -> Option<u32> {
        self.lock().by_source.get(&source_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries ordered by numeric id.
    pub fn entries(&self) -> Vec<CitationEntry> {
        self.lock().entries.clone()
    }

    /// Check the markers in `report_text` against the registry.
    pub fn validate(&self, report_text: &str) -> CitationValidation {
        let registered: BTreeSet<u32> = self.lock().entries.iter().map(|e| e.numeric_id).collect();
        validate_against(report_text, &registered)
    }
}

/// Validate markers in `text` against an explicit set of registered ids.
pub fn validate_against(text: &str, registered: &BTreeSet<u32>) -> CitationValidation {
    let used: BTreeSet<u32> = extract_citation_ids(text).into_iter().collect();
    let max_registered = registered.iter().next_back().copied().unwrap_or(0);

    let mut validation = CitationValidation {
        correctly_used_ids: used.intersection(registered).copied().collect(),
        unused_registered_ids: registered.difference(&used).copied().collect(),
        registered_citation_ids: registered.clone(),
        ..Default::default()
    };
    for &id in used.difference(registered) {
        if id == 0 || id > max_registered {
            validation.out_of_range_ids_in_text.insert(id);
        } else {
            validation.unregistered_ids_in_text.insert(id);
        }
    }
    validation.used_citation_ids = used;
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_record(id: u32, url: &str, title: &str) -> SourceRecord {
        SourceRecord {
            id: SourceId::new(id),
            url: url.to_string(),
            canonical_url: url.to_string(),
            title: title.to_string(),
            content_excerpt: String::new(),
            credibility_score: 0.5,
            first_seen_depth: 1,
            discovered_via: "q".to_string(),
        }
    }

    fn set(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_register_is_sequential_and_idempotent() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        assert_eq!(registry.register(SourceId::new(10)), 1);
        assert_eq!(registry.register(SourceId::new(3)), 2);
        assert_eq!(registry.register(SourceId::new(10)), 1);
        assert_eq!(registry.register(SourceId::new(7)), 3);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.numeric_id(SourceId::new(3)), Some(2));
        assert_eq!(registry.numeric_id(SourceId::new(99)), None);
    }

    #[test]
    fn test_register_source_formats_entry() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        let record = make_record(1, "https://www.nasa.gov/a", "Moon Missions");
        assert_eq!(registry.register(record.id), 1);
        // Late metadata fills the earlier bare registration
        assert_eq!(registry.register_source(&record), 1);
        assert_eq!(
            registry.entries()[0].formatted_string,
            "*nasa.gov*, \"Moon Missions\", https://www.nasa.gov/a"
        );
    }

    #[test]
    fn test_apa_style() {
        let record = make_record(1, "https://example.org/paper", "A Study.");
        assert_eq!(
            format_citation(&record, CitationStyle::Apa),
            "A Study. (n.d.). example.org. https://example.org/paper"
        );
    }

    #[test]
    fn test_extract_citation_ids() {
        let text = "Claim [1]. Another [2, 3]. Link [text](http://x). Odd [ 4 ] and [12].";
        assert_eq!(extract_citation_ids(text), vec![1, 2, 3, 12]);
    }

    #[test]
    fn test_validate_out_of_range() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        for i in 1..=5 {
            registry.register(SourceId::new(i));
        }
        let v = registry.validate("Fact [1]. Fact [3]. Unknown [7]. Zero [0].");
        assert_eq!(v.used_citation_ids, set(&[0, 1, 3, 7]));
        assert_eq!(v.correctly_used_ids, set(&[1, 3]));
        assert_eq!(v.out_of_range_ids_in_text, set(&[0, 7]));
        assert!(v.unregistered_ids_in_text.is_empty());
        assert_eq!(v.unused_registered_ids, set(&[2, 4, 5]));
        assert!(!v.is_valid());
    }

    #[test]
    fn test_validate_overflowing_marker_is_out_of_range() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        for i in 1..=5 {
            registry.register(SourceId::new(i));
        }
        let validation = registry.validate("Claims [7] and [4294967296].");
        assert_eq!(validation.used_citation_ids.len(), 2);
        assert!(validation.out_of_range_ids_in_text.contains(&7));
        assert!(validation.out_of_range_ids_in_text.contains(&u32::MAX));
        assert!(validation.correctly_used_ids.is_empty());
        assert!(!validation.is_valid());
    }

    #[test]
    fn test_validate_gap_is_unregistered() {
        let v = validate_against("See [2] and [4].", &set(&[1, 3, 4]));
        assert_eq!(v.unregistered_ids_in_text, set(&[2]));
        assert_eq!(v.correctly_used_ids, set(&[4]));
        assert!(v.out_of_range_ids_in_text.is_empty());
    }

    #[test]
    fn test_validate_empty_registry() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        let v = registry.validate("Cited [1].");
        assert_eq!(v.out_of_range_ids_in_text, set(&[1]));
        assert!(v.correctly_used_ids.is_empty());
        assert!(registry.validate("No markers.").is_valid());
    }

    #[test]
    fn test_contexts() {
        let registry = CitationRegistry::new(CitationStyle::Web);
        let id = registry.register(SourceId::new(1));
        registry.record_context(id, "Fact A");
        registry.record_context(id, "Fact B");
        assert_eq!(registry.contexts(id), vec!["Fact A", "Fact B"]);
        assert!(registry.contexts(9).is_empty());
    }

    #[test]
    fn test_concurrent_registration_is_gapless() {
        let registry = std::sync::Arc::new(CitationRegistry::new(CitationStyle::Web));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..25u32 {
                        registry.register(SourceId::new((i * 7 + t) % 30));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let ids: Vec<u32> = registry.entries().iter().map(|e| e.numeric_id).collect();
        assert_eq!(ids, (1..=registry.len() as u32).collect::<Vec<_>>());
        let sources: BTreeSet<SourceId> = registry.entries().iter().map(|e| e.source_id).collect();
        assert_eq!(sources.len(), registry.len());
    }
}
