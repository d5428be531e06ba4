// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hybrid search: dense cosine retrieval fused with BM25, MMR-reranked,
//! overlap-deduplicated.
//!
//! Dense scoring is a brute-force scan over all stored embeddings, which is
//! adequate at project scale. The sparse side rides the store's FTS index;
//! rank values there are negative with most negative best, so they are
//! normalized linearly into [0, 1] across the returned set. Fusion weights,
//! the MMR lambda, and the overlap ratio all come from `IndexConfig`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::embeddings::Embedder;
use crate::error::ServiceError;
use crate::store::Store;
use crate::types::{Chunk, IndexConfig, SearchOptions, SearchResponse, SearchResultItem, SearchStatus};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Hard cap on the number of results.
const MAX_TOP_K: usize = 50;

/// Hybrid search engine.
pub struct SearchEngine {
    store: Arc<Mutex<Store>>,
    embedder: Arc<dyn Embedder>,
    config: IndexConfig,
}

struct ScoredChunk {
    chunk: Chunk,
    score: f32,
}

impl SearchEngine {
    pub fn new(store: Arc<Mutex<Store>>, embedder: Arc<dyn Embedder>, config: IndexConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Run the full query pipeline.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, ServiceError> {
        let start = Instant::now();

        let requested_k = options
            .top_k
            .unwrap_or(self.config.top_k)
            .min(self.config.max_top_k.min(MAX_TOP_K));
        let threshold = options
            .score_threshold
            .unwrap_or(self.config.score_threshold);
        let effective_k = effective_k(query, requested_k);
        let candidate_pool = 3 * effective_k;

        let query_embedding = self.embedder.embed_one(query).await?;

        let (sparse, chunks) = {
            let store = self.store.lock().await;
            // Invalid MATCH syntax degrades to dense-only scoring.
            let sparse = match store.fts_search(query, candidate_pool) {
                Ok(hits) => normalize_bm25(&hits),
                Err(e) => {
                    tracing::debug!(error = %e, "sparse query failed, continuing dense-only");
                    HashMap::new()
                }
            };
            (sparse, store.get_all()?)
        };

        let mut scored: Vec<ScoredChunk> = Vec::new();
        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            let dense = cosine_similarity(&query_embedding.values, embedding);
            let sparse_score = chunk
                .id
                .and_then(|id| sparse.get(&id).copied())
                .unwrap_or(0.0);
            let hybrid =
                self.config.dense_weight * dense + self.config.sparse_weight * sparse_score;

            if hybrid < threshold {
                continue;
            }
            if let Some(filter) = &options.semantic_type {
                if &chunk.semantic_type != filter {
                    continue;
                }
            }
            scored.push(ScoredChunk {
                chunk,
                score: hybrid,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(candidate_pool);

        let reranked = mmr_rerank(scored, effective_k, self.config.mmr_lambda);
        let deduped = overlap_dedup(reranked, self.config.overlap_ratio);

        let results: Vec<SearchResultItem> = deduped
            .into_iter()
            .take(effective_k)
            .map(|sc| SearchResultItem {
                file_path: sc.chunk.file_path.clone(),
                line_range: [sc.chunk.start_line, sc.chunk.end_line],
                xml_element_hierarchy: render_hierarchy(&sc.chunk),
                score: round_score(sc.score),
                chunk_id: sc
                    .chunk
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("search.query", start.elapsed());

        Ok(SearchResponse {
            results,
            confidence_threshold: threshold,
            query_latency_ms: start.elapsed().as_millis() as u64,
            status: SearchStatus::Ok,
            message: None,
        })
    }
}

/// Widen or narrow K by query word count: terse queries fan out, verbose
/// queries get a small buffer, capped at 50.
pub fn effective_k(query: &str, requested_k: usize) -> usize {
    let words = query.split_whitespace().count();
    if words <= 2 {
        8
    } else if words <= 5 {
        requested_k
    } else {
        (requested_k + 5).min(MAX_TOP_K)
    }
}

/// Linear normalization of FTS ranks into [0, 1]: best (most negative) → 1,
/// worst → 0. A single row normalizes to exactly 1.0.
pub fn normalize_bm25(hits: &[(i64, f64)]) -> HashMap<i64, f32> {
    if hits.is_empty() {
        return HashMap::new();
    }
    let best = hits.iter().map(|(_, r)| *r).fold(f64::INFINITY, f64::min);
    let worst = hits.iter().map(|(_, r)| *r).fold(f64::NEG_INFINITY, f64::max);
    let span = worst - best;

    hits.iter()
        .map(|(id, rank)| {
            let norm = if span <= f64::EPSILON {
                1.0
            } else {
                ((worst - rank) / span) as f32
            };
            (*id, norm)
        })
        .collect()
}

/// Cosine similarity, 0 when either norm is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy MMR: maximize `λ·relevance − (1−λ)·max_sim_to_selected`.
/// Ties break toward the earlier candidate.
fn mmr_rerank(candidates: Vec<ScoredChunk>, k: usize, lambda: f32) -> Vec<ScoredChunk> {
    if candidates.len() <= 1 {
        return candidates;
    }

    let mut remaining: Vec<ScoredChunk> = candidates;
    let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k);

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (idx, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| match (&candidate.chunk.embedding, &s.chunk.embedding) {
                    (Some(a), Some(b)) => cosine_similarity(a, b),
                    _ => 0.0,
                })
                .fold(0.0f32, f32::max);
            let value = lambda * candidate.score - (1.0 - lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }

    selected
}

/// Drop a candidate when an already-kept chunk from the same file overlaps
/// it by more than the given ratio of the smaller span.
fn overlap_dedup(candidates: Vec<ScoredChunk>, max_ratio: f32) -> Vec<ScoredChunk> {
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let redundant = kept.iter().any(|existing| {
            existing.chunk.file_path == candidate.chunk.file_path
                && span_overlap_ratio(
                    (candidate.chunk.start_line, candidate.chunk.end_line),
                    (existing.chunk.start_line, existing.chunk.end_line),
                ) > max_ratio
        });
        if !redundant {
            kept.push(candidate);
        }
    }
    kept
}

/// `overlap_lines / min(span_a, span_b)`; 0 when disjoint.
fn span_overlap_ratio(a: (u32, u32), b: (u32, u32)) -> f32 {
    let overlap_start = a.0.max(b.0);
    let overlap_end = a.1.min(b.1);
    if overlap_end < overlap_start {
        return 0.0;
    }
    let overlap = (overlap_end - overlap_start + 1) as f32;
    let span_a = (a.1 - a.0 + 1) as f32;
    let span_b = (b.1 - b.0 + 1) as f32;
    overlap / span_a.min(span_b)
}

fn round_score(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

/// Render `[ artifact, resource?, sequence?, leaf ]`, omitting absent levels.
pub fn render_hierarchy(chunk: &Chunk) -> Vec<String> {
    let mut levels = Vec::new();

    if let Some(artifact) = chunk.context.get("artifact") {
        let artifact_type = artifact
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or(&chunk.resource_type);
        let name = artifact
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        levels.push(format!("{}:{}", artifact_type, name));
    }

    if let Some(resource) = chunk.context.get("resource").and_then(|v| v.as_object()) {
        let methods = resource.get("methods").and_then(|v| v.as_str());
        let uri = resource.get("uri-template").and_then(|v| v.as_str());
        match (methods, uri) {
            (Some(m), Some(u)) => levels.push(format!("resource:{} {}", m, u)),
            (Some(m), None) => levels.push(format!("resource:{}", m)),
            (None, Some(u)) => levels.push(format!("resource:{}", u)),
            (None, None) => {}
        }
    }

    if let Some(sequence) = chunk.context.get("sequence") {
        if let Some(name) = sequence.get("name").and_then(|v| v.as_str()) {
            levels.push(format!("sequence:{}", name));
        }
    }

    levels.push(format!("{}:{}", chunk.chunk_type, chunk.resource_name));
    levels
}
