// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the chunker and search scoring hot paths.

use std::path::Path;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use artidex::chunker::{CharEstimateCounter, Chunker};
use artidex::registry::ArtifactRegistry;
use artidex::search::{cosine_similarity, normalize_bm25};

fn synthetic_api(resources: usize) -> String {
    let mut doc = String::from("<api name=\"BenchApi\" context=\"/bench\">\n");
    for i in 0..resources {
        doc.push_str(&format!(
            "  <resource methods=\"GET\" uri-template=\"/r{i}\">\n    <inSequence>\n      <log level=\"full\"/>\n      <sequence key=\"Seq{i}\"/>\n      <respond/>\n    </inSequence>\n  </resource>\n"
        ));
    }
    doc.push_str("</api>\n");
    doc
}

fn bench_chunker(c: &mut Criterion) {
    let chunker = Chunker::new(
        Arc::new(ArtifactRegistry::new()),
        Arc::new(CharEstimateCounter),
        128,
    );
    let doc = synthetic_api(50);

    c.bench_function("chunk_50_resources", |b| {
        b.iter(|| {
            let chunks = chunker
                .chunk_content(Path::new("/bench/apis/BenchApi.xml"), black_box(&doc))
                .unwrap();
            black_box(chunks)
        })
    });
}

fn bench_scoring(c: &mut Criterion) {
    let query: Vec<f32> = (0..384).map(|i| (i as f32 * 0.37).sin()).collect();
    let corpus: Vec<Vec<f32>> = (0..1000)
        .map(|j| (0..384).map(|i| ((i + j) as f32 * 0.21).cos()).collect())
        .collect();

    c.bench_function("cosine_scan_1k_x_384", |b| {
        b.iter(|| {
            let best = corpus
                .iter()
                .map(|v| cosine_similarity(black_box(&query), v))
                .fold(f32::NEG_INFINITY, f32::max);
            black_box(best)
        })
    });

    let hits: Vec<(i64, f64)> = (0..150).map(|i| (i, -(i as f64) * 0.3 - 1.0)).collect();
    c.bench_function("bm25_normalize_150", |b| {
        b.iter(|| black_box(normalize_bm25(black_box(&hits))))
    });
}

criterion_group!(benches, bench_chunker, bench_scoring);
criterion_main!(benches);
