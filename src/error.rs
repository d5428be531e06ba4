// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the artifact index.
//!
//! This module provides strongly-typed errors for different parts of the index,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation.

use thiserror::Error;

/// Errors that can occur while chunking an XML artifact.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("XML parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Empty document: {0}")]
    EmptyDocument(String),
}

impl From<std::io::Error> for ChunkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

/// Errors that can occur in the embedded store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The native SQLite library is incompatible with the database file.
    /// Not recoverable by deleting the file; the user must fix the install.
    #[error("Store binary incompatible with host: {0}. Reinstall to rebuild the native store.")]
    AbiMismatch(String),

    /// The database failed to open twice, once before and once after recovery.
    #[error("Store corrupt and unrecoverable: {0}")]
    Corruption(String),

    #[error("Failed to open store: {0}")]
    OpenFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Invalid MATCH expression. Callers treat this as an empty sparse set.
    #[error("FTS query syntax error: {0}")]
    FtsSyntax(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl StoreError {
    /// True when the open failure warrants the single delete-and-reopen recovery.
    pub fn is_recoverable_open_failure(&self) -> bool {
        !matches!(self, Self::AbiMismatch(_))
    }
}

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Required model files are missing after the provider ran.
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response parsing error: {0}")]
    ParseResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors surfaced by the service facade.
///
/// The facade never throws into its caller; these become structured responses
/// or readiness events. They exist so internal layers can bubble precisely.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Embed error: {0}")]
    Embed(#[from] EmbedError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Index not ready")]
    NotReady,

    #[error("Service stopped")]
    Stopped,

    #[error("Initialization failed: {0}")]
    InitFailed(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
