// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Artidex - per-project semantic index for XML integration artifacts.
//!
//! Watches a project tree of XML configuration artifacts (APIs, sequences,
//! endpoints, proxies, data services, ...), decomposes each file into
//! token-bounded semantic chunks, embeds each chunk, and serves hybrid
//! dense + sparse search with diversity reranking.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (Chunk, IndexConfig, SearchResponse, etc.)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Project configuration loading
//! - [`registry`] - Artifact plugins and tag classification
//! - [`chunker`] - Structure-aware XML chunking
//! - [`merkle`] - Content hashing and hierarchical change detection
//! - [`store`] - SQLite store with the FTS mirror
//! - [`scanner`] - Directory walking and file-hash change detection
//! - [`pipeline`] - Incremental Scanner → Chunker → Store orchestration
//! - [`search`] - Hybrid dense + BM25 search with MMR and overlap dedup
//! - [`embeddings`] - Embedder trait, Ollama implementation, model layout
//! - [`service`] - Per-project facade with lifecycle and readiness
//! - [`telemetry`] - Tracing and metrics infrastructure
//!
//! # Example
//!
//! ```rust,ignore
//! use artidex::service::IndexService;
//! use artidex::types::{IndexConfig, SearchOptions};
//!
//! let service = IndexService::for_project(project_root, IndexConfig::default());
//! service.start().await;
//! service.wait_for_ready().await;
//!
//! let response = service.search("validate order payload", &SearchOptions::default()).await;
//! for result in response.results {
//!     println!("{}:{}-{} {:.3}", result.file_path,
//!         result.line_range[0], result.line_range[1], result.score);
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod merkle;
pub mod pipeline;
pub mod registry;
pub mod scanner;
pub mod search;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ChunkError, EmbedError, Result, ServiceError, StoreError};
pub use service::{IndexService, ServiceState};
pub use types::{
    Chunk, FileChange, IndexConfig, IndexProgress, IndexResult, IndexStage, IndexStats,
    SearchOptions, SearchResponse, SearchResultItem, SearchStatus, SemanticIntent,
};

/// Artidex version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
