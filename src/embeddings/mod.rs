// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding providers.
//!
//! The index consumes embedders through the [`Embedder`] trait; the stock
//! implementation talks to a local Ollama server. Model file provisioning
//! is a separate read-only contract ([`ModelProvider`]).

pub mod base;
pub mod model;
pub mod ollama;

pub use base::{Embedder, EmbedderTokenCounter};
pub use model::{verify_model_layout, DirModelProvider, ModelProvider, REQUIRED_MODEL_FILES};
pub use ollama::OllamaEmbedder;

use std::sync::Arc;

use crate::types::IndexConfig;

/// Create the stock embedder for a configuration.
pub fn create_embedder(config: &IndexConfig) -> Arc<dyn Embedder> {
    Arc::new(OllamaEmbedder::new(
        &config.ollama_model,
        Some(&config.ollama_base_url),
    ))
}
