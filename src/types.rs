// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the artifact index.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a chunk is for, derived from its tag and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticIntent {
    Validation,
    Transformation,
    Delegation,
    Response,
    Logging,
    ErrorHandling,
    DataAccess,
    Mediation,
    Processing,
}

impl SemanticIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transformation => "transformation",
            Self::Delegation => "delegation",
            Self::Response => "response",
            Self::Logging => "logging",
            Self::ErrorHandling => "error-handling",
            Self::DataAccess => "data-access",
            Self::Mediation => "mediation",
            Self::Processing => "processing",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "validation" => Self::Validation,
            "transformation" => Self::Transformation,
            "delegation" => Self::Delegation,
            "response" => Self::Response,
            "logging" => Self::Logging,
            "error-handling" => Self::ErrorHandling,
            "data-access" => Self::DataAccess,
            "mediation" => Self::Mediation,
            _ => Self::Processing,
        }
    }
}

impl std::fmt::Display for SemanticIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A token-bounded semantic subtree of an artifact, the unit of embedding
/// and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Store-assigned row id; `None` until persisted.
    pub id: Option<i64>,
    /// Absolute path of the source file.
    pub file_path: String,
    /// SHA-256 of the source file content at time of chunking.
    pub file_hash: String,
    /// Emission order within the file.
    pub chunk_index: u32,
    /// Start line (1-indexed, inclusive).
    pub start_line: u32,
    /// End line (1-indexed, inclusive).
    pub end_line: u32,
    /// Best-available name (`name`/`key`/`context` attribute, else tag).
    pub resource_name: String,
    /// Artifact type (`api`, `sequence`, `dataService`, ...).
    pub resource_type: String,
    /// The XML tag that induced this chunk.
    pub chunk_type: String,
    /// Parent within the same file's emission, as a store id.
    pub parent_chunk_id: Option<i64>,
    /// Parent within the same file's emission, as an emission index.
    /// Resolved to `parent_chunk_id` by the pipeline; not persisted.
    #[serde(skip)]
    pub parent_index: Option<u32>,
    /// Fixed-dimensional embedding; `None` until embedded or reused.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// SHA-256 over content + semantic metadata (canonically encoded).
    pub content_hash: String,
    /// Open classification: `api`, `sequence`, `mediator`, `connector`,
    /// `policy`, `configuration`, `boundary`, `component`, ...
    pub semantic_type: String,
    pub semantic_intent: SemanticIntent,
    /// Schema-agnostic hierarchical context, keyed by local element names.
    pub context: serde_json::Value,
    /// Set iff this chunk is a standalone artifact definition.
    pub sequence_key: Option<String>,
    pub is_sequence_definition: bool,
    /// Qualified references (`type:name`) found in the chunk content.
    pub referenced_sequences: Vec<String>,
    /// Last write, epoch milliseconds.
    pub timestamp: i64,
    /// The text actually fed to the embedder; mirrored into the FTS table.
    pub embedding_text: String,
}

impl Chunk {
    /// Number of lines covered by this chunk.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// The reconciliation slot key used for incremental updates.
    pub fn slot(&self) -> (u32, u32, u32) {
        (self.chunk_index, self.start_line, self.end_line)
    }
}

/// A change detected by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    /// SHA-256 of the current content; empty when the file is gone.
    pub hash: String,
    pub exists: bool,
}

/// Index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// File extensions included in scans.
    pub watch_extensions: Vec<String>,
    /// Glob patterns excluded from scans.
    pub exclude_patterns: Vec<String>,
    /// Token ceiling for a chunk's embedding text.
    pub max_tokens: usize,
    /// Per-path collapse window for change notifications, milliseconds.
    pub debounce_ms: u64,
    /// Background incremental scan interval, seconds. 0 disables polling.
    pub poll_interval_secs: u64,
    /// Default number of results.
    pub top_k: usize,
    /// Hard cap on requested results.
    pub max_top_k: usize,
    /// Minimum hybrid score for a result.
    pub score_threshold: f32,
    /// Dense (cosine) contribution to the hybrid score.
    pub dense_weight: f32,
    /// Sparse (BM25) contribution to the hybrid score.
    pub sparse_weight: f32,
    /// MMR relevance/diversity trade-off.
    pub mmr_lambda: f32,
    /// Same-file span overlap ratio above which the lower result is dropped.
    pub overlap_ratio: f32,
    /// When true, `find_definition` requires the `type:` qualifier to match
    /// the definition's resource type. The stock behavior matches on name
    /// alone, mirroring how references resolve in practice.
    pub match_reference_qualifier: bool,
    /// Ollama embedding model.
    pub ollama_model: String,
    /// Ollama base URL.
    pub ollama_base_url: String,
    /// Override for the per-project store directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            watch_extensions: vec![
                "xml".to_string(),
                "yaml".to_string(),
                "yml".to_string(),
                "properties".to_string(),
                "dmc".to_string(),
            ],
            exclude_patterns: vec![
                "**/target/**".to_string(),
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/build/**".to_string(),
            ],
            max_tokens: 512,
            debounce_ms: 2000,
            poll_interval_secs: 30,
            top_k: 10,
            max_top_k: 50,
            score_threshold: 0.25,
            dense_weight: 0.85,
            sparse_weight: 0.15,
            mmr_lambda: 0.7,
            overlap_ratio: 0.5,
            match_reference_qualifier: false,
            ollama_model: "nomic-embed-text".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            data_dir: None,
        }
    }
}

/// Search options accepted by the facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub semantic_type: Option<String>,
}

/// Status of a search response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Ok,
    /// Index not ready; caller should fall back to plain text search.
    EmbeddingServiceUnavailable,
    /// Zero indexed chunks; success with fallback guidance.
    EmptyIndex,
}

/// A single ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub file_path: String,
    /// `[start, end]`, 1-indexed inclusive.
    pub line_range: [u32; 2],
    /// Rendered hierarchy, artifact root first.
    pub xml_element_hierarchy: Vec<String>,
    pub score: f32,
    pub chunk_id: String,
}

/// Response envelope for a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub confidence_threshold: f32,
    pub query_latency_ms: u64,
    pub status: SearchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResponse {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            confidence_threshold: 0.0,
            query_latency_ms: 0,
            status: SearchStatus::EmbeddingServiceUnavailable,
            message: Some(message.into()),
        }
    }

    pub fn empty_index(message: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            confidence_threshold: 0.0,
            query_latency_ms: 0,
            status: SearchStatus::EmptyIndex,
            message: Some(message.into()),
        }
    }
}

/// Stage of an indexing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStage {
    Scanning,
    Embedding,
    Updating,
    Complete,
}

impl IndexStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Embedding => "embedding",
            Self::Updating => "updating",
            Self::Complete => "complete",
        }
    }
}

/// Progress update during indexing.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub stage: IndexStage,
    pub detail: String,
    pub file_index: u32,
    pub total_files: u32,
}

/// Result of an indexing pass.
#[derive(Debug, Clone, Default)]
pub struct IndexResult {
    /// Files whose chunks were reconciled.
    pub files_processed: u32,
    /// Files removed from the index.
    pub files_deleted: u32,
    /// Chunks that went through the embedder.
    pub chunks_embedded: u32,
    /// Chunks whose stored embedding was kept.
    pub chunks_reused: u32,
    /// Stale chunk rows removed.
    pub chunks_deleted: u32,
    /// Chunks skipped because embedding failed.
    pub chunks_failed: u32,
    pub duration_ms: u64,
}

/// Index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: u32,
    pub total_chunks: u32,
    pub index_size_bytes: u64,
    /// Epoch milliseconds of the most recent chunk write.
    pub last_indexed: Option<i64>,
}

/// Embedding vector with metadata.
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub values: Vec<f32>,
    pub dimensions: usize,
}

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        let dimensions = values.len();
        Self { values, dimensions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_intent_roundtrip() {
        let intents = [
            SemanticIntent::Validation,
            SemanticIntent::Transformation,
            SemanticIntent::Delegation,
            SemanticIntent::Response,
            SemanticIntent::Logging,
            SemanticIntent::ErrorHandling,
            SemanticIntent::DataAccess,
            SemanticIntent::Mediation,
            SemanticIntent::Processing,
        ];

        for intent in intents {
            let parsed = SemanticIntent::parse(intent.as_str());
            assert_eq!(intent, parsed, "Failed roundtrip for {:?}", intent);
        }
    }

    #[test]
    fn test_intent_parse_unknown_defaults_to_processing() {
        assert_eq!(SemanticIntent::parse("whatever"), SemanticIntent::Processing);
    }

    #[test]
    fn test_chunk_line_count_and_slot() {
        let chunk = Chunk {
            id: None,
            file_path: "/p/a.xml".to_string(),
            file_hash: "h".to_string(),
            chunk_index: 3,
            start_line: 10,
            end_line: 15,
            resource_name: "r".to_string(),
            resource_type: "api".to_string(),
            chunk_type: "resource".to_string(),
            parent_chunk_id: None,
            parent_index: None,
            embedding: None,
            content_hash: "c".to_string(),
            semantic_type: "api".to_string(),
            semantic_intent: SemanticIntent::Mediation,
            context: serde_json::json!({}),
            sequence_key: None,
            is_sequence_definition: false,
            referenced_sequences: Vec::new(),
            timestamp: 0,
            embedding_text: String::new(),
        };

        assert_eq!(chunk.line_count(), 6);
        assert_eq!(chunk.slot(), (3, 10, 15));
    }

    #[test]
    fn test_index_config_default() {
        let config = IndexConfig::default();
        assert_eq!(config.top_k, 10);
        assert_eq!(config.max_top_k, 50);
        assert!((config.score_threshold - 0.25).abs() < 0.001);
        assert!((config.dense_weight - 0.85).abs() < 0.001);
        assert!((config.sparse_weight - 0.15).abs() < 0.001);
        assert!((config.mmr_lambda - 0.7).abs() < 0.001);
        assert_eq!(config.debounce_ms, 2000);
        assert_eq!(config.max_tokens, 512);
        assert!(config.watch_extensions.contains(&"xml".to_string()));
        assert!(!config.match_reference_qualifier);
    }

    #[test]
    fn test_search_status_serialization() {
        let json = serde_json::to_string(&SearchStatus::EmbeddingServiceUnavailable).unwrap();
        assert_eq!(json, "\"EMBEDDING_SERVICE_UNAVAILABLE\"");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(IndexStage::Scanning.as_str(), "scanning");
        assert_eq!(IndexStage::Complete.as_str(), "complete");
    }
}
