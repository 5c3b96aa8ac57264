//! Benchmarks for the transformation pipeline.
//!
//! Run with: cargo bench --bench transform_bench
//!
//! These benchmarks separate the one-time costs (compiling a stylesheet,
//! fingerprinting its text) from the per-request costs (cache lookup and
//! the full parse/execute/serialize path).

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xslt_policy::{
    Fingerprint, IdentityResolver, SecurityProfile, TemplateCache, TransformEngine, XsltBackend,
    XsltProcessor,
};

const STYLESHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
    <xsl:param name="channel" select="'api'"/>
    <xsl:template match="/">
        <envelope channel="{$channel}">
            <xsl:for-each select="order/item">
                <entry id="{@id}"><xsl:value-of select="."/></entry>
            </xsl:for-each>
        </envelope>
    </xsl:template>
</xsl:stylesheet>"#;

/// An order document with `items` line items.
fn order_document(items: usize) -> String {
    let mut doc = String::from("<order>");
    for i in 0..items {
        doc.push_str(&format!("<item id=\"{}\">part-{}</item>", i, i));
    }
    doc.push_str("</order>");
    doc
}

fn engine() -> TransformEngine {
    TransformEngine::new(Arc::new(TemplateCache::new(Arc::new(XsltProcessor::new()))))
}

// ============================================================================
// Compilation Benchmarks
// ============================================================================

fn bench_stylesheet_compile(c: &mut Criterion) {
    let processor = XsltProcessor::new();

    c.bench_function("stylesheet_compile", |b| {
        b.iter(|| processor.compile(black_box(STYLESHEET), SecurityProfile::Secure))
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    c.bench_function("fingerprint", |b| {
        b.iter(|| Fingerprint::of(black_box(STYLESHEET)))
    });
}

// ============================================================================
// Cache Benchmarks
// ============================================================================

fn bench_cache_hit(c: &mut Criterion) {
    let cache = TemplateCache::new(Arc::new(XsltProcessor::new()));
    cache
        .get_or_compile(STYLESHEET, SecurityProfile::Secure)
        .unwrap();

    c.bench_function("cache_hit", |b| {
        b.iter(|| cache.get_or_compile(black_box(STYLESHEET), SecurityProfile::Secure))
    });
}

// ============================================================================
// End-to-End Transformation Benchmarks
// ============================================================================

fn bench_transform_warm(c: &mut Criterion) {
    let engine = engine();
    let input = order_document(10);
    // warm the template cache so only per-request work is measured
    engine
        .transform(
            input.as_bytes(),
            STYLESHEET,
            &[],
            &IdentityResolver,
            SecurityProfile::Secure,
        )
        .unwrap();

    c.bench_function("transform_warm", |b| {
        b.iter(|| {
            engine.transform(
                black_box(input.as_bytes()),
                STYLESHEET,
                &[],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
        })
    });
}

// ============================================================================
// Input Size Scaling Benchmarks
// ============================================================================

fn bench_transform_scaling(c: &mut Criterion) {
    let engine = engine();
    let mut group = c.benchmark_group("transform_scaling");

    for item_count in [1, 10, 100, 500].iter() {
        let input = order_document(*item_count);
        engine
            .transform(
                input.as_bytes(),
                STYLESHEET,
                &[],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
            .unwrap();

        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(item_count),
            &input,
            |b, input| {
                b.iter(|| {
                    engine.transform(
                        black_box(input.as_bytes()),
                        STYLESHEET,
                        &[],
                        &IdentityResolver,
                        SecurityProfile::Secure,
                    )
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(compile_benches, bench_stylesheet_compile, bench_fingerprint);

criterion_group!(cache_benches, bench_cache_hit);

criterion_group!(transform_benches, bench_transform_warm, bench_transform_scaling);

criterion_main!(compile_benches, cache_benches, transform_benches);
