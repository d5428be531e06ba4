// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Base trait for embedders.

use async_trait::async_trait;

use crate::chunker::TokenCounter;
use crate::error::EmbedError;
use crate::types::EmbeddingVector;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Model name.
    fn model(&self) -> &str;

    /// Embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts. The result has one entry per
    /// input; an entry with no components marks a text the provider could
    /// not embed, and callers skip the corresponding chunk rather than store
    /// a fabricated vector.
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError>;

    /// Generate an embedding for a single text. The skip marker is an error
    /// here: a query without an embedding cannot be scored.
    async fn embed_one(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .filter(|v| !v.values.is_empty())
            .ok_or_else(|| EmbedError::Inference("no embedding returned".to_string()))
    }

    /// Token count for a text, used by the chunker's token gate. The default
    /// is a four-characters-per-token estimate; providers with a real
    /// tokenizer should override.
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4).max(1)
    }

    /// Check if the provider is reachable.
    async fn is_available(&self) -> bool;
}

/// Adapter letting an embedder serve as the chunker's token counter.
pub struct EmbedderTokenCounter(pub std::sync::Arc<dyn Embedder>);

impl TokenCounter for EmbedderTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.0.count_tokens(text)
    }
}
