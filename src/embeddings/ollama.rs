// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama embedder.
//!
//! Built around the batch `/api/embed` endpoint because the pipeline hands
//! over whole files of chunk texts at once. A batch that fails degrades to
//! per-text requests, and a text that still cannot be embedded comes back as
//! an empty vector, the marker callers treat as "skip this chunk".

use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::types::EmbeddingVector;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::base::Embedder;

/// Texts per request; chunk embedding texts can run close to the token
/// ceiling, so requests stay bounded.
const BATCH_SIZE: usize = 32;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by a local Ollama server.
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    base_url: String,
    /// Output dimension, learned from the first successful response.
    dimensions: AtomicUsize,
}

impl OllamaEmbedder {
    pub fn new(model: &str, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');

        Self {
            client: Client::new(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            dimensions: AtomicUsize::new(0),
        }
    }

    /// One `/api/embed` call for a slice of texts.
    async fn request_batch(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbedError::Inference(format!(
                "embed endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse =
            serde_json::from_str(&body).map_err(|e| EmbedError::ParseResponse(e.to_string()))?;
        if parsed.embeddings.len() != input.len() {
            return Err(EmbedError::ParseResponse(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }

    /// Accept a vector only if it matches the established dimension; the
    /// first non-empty vector establishes it. A rejected vector becomes the
    /// empty skip marker.
    fn admit(&self, values: Vec<f32>) -> EmbeddingVector {
        if values.is_empty() {
            return EmbeddingVector::new(Vec::new());
        }
        let known = self.dimensions.load(Ordering::SeqCst);
        if known == 0 {
            self.dimensions.store(values.len(), Ordering::SeqCst);
        } else if values.len() != known {
            tracing::warn!(
                expected = known,
                actual = values.len(),
                "embedding dimension drifted, skipping text"
            );
            return EmbeddingVector::new(Vec::new());
        }
        EmbeddingVector::new(values)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::SeqCst)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<EmbeddingVector> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            match self.request_batch(batch).await {
                Ok(vectors) => {
                    results.extend(vectors.into_iter().map(|v| self.admit(v)));
                }
                Err(batch_err) => {
                    // Retry singly so one poisonous text cannot sink its
                    // whole batch; stubborn texts become skip markers.
                    tracing::warn!(error = %batch_err, size = batch.len(), "batch embed failed, retrying singly");
                    for text in batch {
                        match self.request_batch(std::slice::from_ref(text)).await {
                            Ok(mut vectors) => {
                                let values = vectors.pop().unwrap_or_default();
                                results.push(self.admit(values));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "single embed failed, skipping text");
                                results.push(EmbeddingVector::new(Vec::new()));
                            }
                        }
                    }
                }
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("embeddings.ollama.embed", start.elapsed());

        Ok(results)
    }

    /// Probe by embedding a one-word input: proves the model is pulled and
    /// producing vectors, and primes the dimension.
    async fn is_available(&self) -> bool {
        match self.request_batch(&["ping".to_string()]).await {
            Ok(vectors) => {
                let usable = vectors.first().is_some_and(|v| !v.is_empty());
                if usable {
                    if let Some(v) = vectors.into_iter().next() {
                        self.admit(v);
                    }
                }
                usable
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OllamaEmbedder::new("nomic-embed-text", Some("http://custom:8080/"));
        assert_eq!(provider.base_url, "http://custom:8080");
    }

    #[test]
    fn test_dimensions_unknown_before_first_response() {
        let provider = OllamaEmbedder::new("nomic-embed-text", None);
        assert_eq!(provider.dimensions(), 0);
    }

    #[test]
    fn test_admit_establishes_then_enforces_dimension() {
        let provider = OllamaEmbedder::new("m", None);

        let first = provider.admit(vec![0.1, 0.2, 0.3]);
        assert_eq!(first.dimensions, 3);
        assert_eq!(provider.dimensions(), 3);

        // A drifted vector is rejected into the skip marker.
        let drifted = provider.admit(vec![0.1, 0.2]);
        assert!(drifted.values.is_empty());
        assert_eq!(provider.dimensions(), 3);

        let ok = provider.admit(vec![0.4, 0.5, 0.6]);
        assert_eq!(ok.dimensions, 3);
    }

    #[test]
    fn test_admit_passes_through_empty_marker() {
        let provider = OllamaEmbedder::new("m", None);
        let marker = provider.admit(Vec::new());
        assert!(marker.values.is_empty());
        assert_eq!(provider.dimensions(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        // No server is listening on this port; an empty input must still
        // succeed because nothing is sent.
        let provider = OllamaEmbedder::new("m", Some("http://127.0.0.1:1"));
        let result = provider.embed(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_skip_markers() {
        let provider = OllamaEmbedder::new("m", Some("http://127.0.0.1:1"));
        let result = provider.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        // Batch fails, singles fail: every text is marked skipped.
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|v| v.values.is_empty()));
        assert!(!provider.is_available().await);
    }
}
