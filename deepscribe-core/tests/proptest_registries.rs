//! Property-based tests for the registries and length arithmetic using proptest.

use proptest::prelude::*;

use deepscribe_core::report::CitationRegistry;
use deepscribe_core::report::LengthTargets;
use deepscribe_core::research::{Admission, SourceId, SourceRegistry, canonicalize_url};
use deepscribe_core::types::{CitationStyle, DetailLevel, LengthConvention, SearchHit};
use std::collections::BTreeSet;

// --- Citation registry properties ---

proptest! {
    #[test]
    fn citation_ids_are_contiguous_from_one(sources in prop::collection::vec(0u32..50, 0..200)) {
        let registry = CitationRegistry::new(CitationStyle::Web);
        for s in &sources {
            registry.register(SourceId::new(*s));
        }
        let ids: Vec<u32> = registry.entries().iter().map(|e| e.numeric_id).collect();
        let expected: Vec<u32> = (1..=ids.len() as u32).collect();
        prop_assert_eq!(ids, expected);
        let distinct: BTreeSet<u32> = sources.iter().copied().collect();
        prop_assert_eq!(registry.len(), distinct.len());
    }

    #[test]
    fn citation_register_is_idempotent(sources in prop::collection::vec(0u32..20, 1..50)) {
        let registry = CitationRegistry::new(CitationStyle::Web);
        let first: Vec<u32> = sources.iter().map(|s| registry.register(SourceId::new(*s))).collect();
        let second: Vec<u32> = sources.iter().map(|s| registry.register(SourceId::new(*s))).collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn correctly_used_is_subset_of_registered(
        registered in 0usize..20,
        markers in prop::collection::vec(0u32..40, 0..30),
    ) {
        let registry = CitationRegistry::new(CitationStyle::Apa);
        for i in 0..registered {
            registry.register(SourceId::new(i as u32 + 100));
        }
        let text: String = markers.iter().map(|m| format!("Claim [{m}]. ")).collect();
        let v = registry.validate(&text);

        prop_assert!(v.correctly_used_ids.is_subset(&v.registered_citation_ids));
        prop_assert!(v.correctly_used_ids.is_subset(&v.used_citation_ids));
        // Every used id lands in exactly one bucket
        for id in &v.used_citation_ids {
            let buckets = [
                v.correctly_used_ids.contains(id),
                v.out_of_range_ids_in_text.contains(id),
                v.unregistered_ids_in_text.contains(id),
            ];
            prop_assert_eq!(buckets.iter().filter(|b| **b).count(), 1);
        }
        for id in &v.out_of_range_ids_in_text {
            prop_assert!(*id == 0 || *id as usize > registered);
        }
    }
}

// --- Source registry properties ---

fn url_variant() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["http", "https", "HTTPS"]),
        prop::sample::select(vec!["example.com", "EXAMPLE.com", "news.example.org"]),
        prop::sample::select(vec!["", "/", "/a", "/a/", "/a/b", "/A/b/"]),
        prop::sample::select(vec!["", "#top", "#x/y"]),
    )
        .prop_map(|(scheme, host, path, fragment)| format!("{scheme}://{host}{path}{fragment}"))
}

proptest! {
    #[test]
    fn no_two_sources_share_a_canonical_url(urls in prop::collection::vec(url_variant(), 1..60)) {
        let registry = SourceRegistry::new();
        for url in &urls {
            registry.admit(&SearchHit::new(url.clone(), "t", "s"), 1, "q");
        }
        let snapshot = registry.snapshot();
        let canonical: BTreeSet<&str> = snapshot.iter().map(|r| r.canonical_url.as_str()).collect();
        prop_assert_eq!(canonical.len(), snapshot.len());

        let expected: BTreeSet<String> = urls.iter().filter_map(|u| canonicalize_url(u)).collect();
        prop_assert_eq!(snapshot.len(), expected.len());
    }

    #[test]
    fn fragment_and_trailing_slash_do_not_create_new_sources(path in "[a-z]{1,8}(/[a-z]{1,8}){0,2}") {
        let registry = SourceRegistry::new();
        let base = format!("https://example.com/{path}");
        let first = registry.admit(&SearchHit::new(base.clone(), "t", "s"), 1, "q");
        let again = registry.admit(&SearchHit::new(format!("{base}/#section"), "t", "s"), 2, "q");
        let first_id = match first {
            Admission::New(record) => record.id,
            other => return Err(TestCaseError::fail(format!("unexpected admission {other:?}"))),
        };
        prop_assert_eq!(again, Admission::Duplicate(first_id));
    }
}

// --- Length floor arithmetic ---

proptest! {
    #[test]
    fn custom_floor_covers_total(total in 1u32..50_000, sections in 1usize..12) {
        let targets = LengthTargets::derive(DetailLevel::Custom(total), sections, LengthConvention::Words);
        prop_assert!(targets.section_floor * sections >= total as usize);
        prop_assert!(targets.section_floor * sections < total as usize + sections);
        prop_assert!(targets.paragraph_floor >= 1);
        prop_assert_eq!(targets.paragraph_floor, (total as usize / 12).max(1));
    }

    #[test]
    fn named_floors_ignore_section_count(sections in 1usize..20) {
        for (level, floor) in [(DetailLevel::Brief, 150), (DetailLevel::Standard, 400), (DetailLevel::Detailed, 800)] {
            let words = LengthTargets::derive(level, sections, LengthConvention::Words);
            let chars = LengthTargets::derive(level, sections, LengthConvention::Characters);
            prop_assert_eq!(words.section_floor, floor);
            prop_assert_eq!(chars.section_floor, floor * 2);
        }
    }
}
