use criterion::{Criterion, black_box, criterion_group, criterion_main};
use deepscribe_core::report::citations::extract_citation_ids;
use deepscribe_core::report::CitationRegistry;
use deepscribe_core::research::{SourceId, SourceRegistry, canonicalize_url};
use deepscribe_core::types::{CitationStyle, SearchHit};

fn make_report_text(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| {
            format!(
                "Paragraph {i} discusses storage economics in depth [{}]. Costs fell sharply [{}, {}].\n\n",
                i % 40 + 1,
                i % 7 + 1,
                i % 11 + 30
            )
        })
        .collect()
}

fn bench_citation_registry(c: &mut Criterion) {
    c.bench_function("citation_register_500", |b| {
        b.iter(|| {
            let registry = CitationRegistry::new(CitationStyle::Web);
            for i in 0..500u32 {
                registry.register(SourceId::new(black_box(i % 120)));
            }
            registry.len()
        })
    });

    let registry = CitationRegistry::new(CitationStyle::Web);
    for i in 0..40 {
        registry.register(SourceId::new(i));
    }
    let short = make_report_text(20);
    let long = make_report_text(2_000);

    c.bench_function("citation_validate_short_report", |b| {
        b.iter(|| registry.validate(black_box(&short)))
    });

    c.bench_function("citation_validate_long_report", |b| {
        b.iter(|| registry.validate(black_box(&long)))
    });

    c.bench_function("citation_extract_ids_long_report", |b| {
        b.iter(|| extract_citation_ids(black_box(&long)))
    });
}

fn bench_source_registry(c: &mut Criterion) {
    c.bench_function("canonicalize_url", |b| {
        b.iter(|| canonicalize_url(black_box("HTTPS://www.Example.com:443/energy/storage/?page=2#intro")))
    });

    let hits: Vec<SearchHit> = (0..300)
        .map(|i| SearchHit::new(format!("https://site{}.example/page/{}/", i % 90, i % 4), "t", "s"))
        .collect();
    c.bench_function("source_admit_300_with_duplicates", |b| {
        b.iter(|| {
            let registry = SourceRegistry::new();
            for hit in &hits {
                registry.admit(black_box(hit), 1, "q");
            }
            registry.len()
        })
    });
}

criterion_group!(benches, bench_citation_registry, bench_source_registry);
criterion_main!(benches);
