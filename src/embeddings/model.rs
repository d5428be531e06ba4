// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model artifact provisioning.
//!
//! The index consumes model files read-only through the `ModelProvider`
//! contract; download and caching live with the host.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::EmbedError;

/// Files a usable local model directory must contain.
pub const REQUIRED_MODEL_FILES: [&str; 5] = [
    "config.json",
    "tokenizer_config.json",
    "tokenizer.json",
    "vocab.txt",
    "onnx/model_quantized.onnx",
];

/// Provides a model directory, ensuring the artifacts exist.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Resolve the model directory, verifying its layout. Missing files
    /// surface as `ModelUnavailable`.
    async fn ensure_model(&self) -> Result<PathBuf, EmbedError>;
}

/// Provider over an already-materialized directory.
pub struct DirModelProvider {
    model_dir: PathBuf,
}

impl DirModelProvider {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }
}

#[async_trait]
impl ModelProvider for DirModelProvider {
    async fn ensure_model(&self) -> Result<PathBuf, EmbedError> {
        verify_model_layout(&self.model_dir)?;
        Ok(self.model_dir.clone())
    }
}

/// Check that every required model file is present.
pub fn verify_model_layout(dir: &Path) -> Result<(), EmbedError> {
    let missing: Vec<&str> = REQUIRED_MODEL_FILES
        .iter()
        .filter(|file| !dir.join(file).is_file())
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EmbedError::ModelUnavailable(format!(
            "missing model files in {}: {}",
            dir.display(),
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn materialize_model(dir: &Path) {
        fs::create_dir_all(dir.join("onnx")).unwrap();
        for file in REQUIRED_MODEL_FILES {
            fs::write(dir.join(file), b"stub").unwrap();
        }
    }

    #[tokio::test]
    async fn test_complete_layout_accepted() {
        let dir = tempdir().unwrap();
        materialize_model(dir.path());

        let provider = DirModelProvider::new(dir.path());
        let resolved = provider.ensure_model().await.unwrap();
        assert_eq!(resolved, dir.path());
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let dir = tempdir().unwrap();
        materialize_model(dir.path());
        fs::remove_file(dir.path().join("vocab.txt")).unwrap();

        let provider = DirModelProvider::new(dir.path());
        let err = provider.ensure_model().await.unwrap_err();
        match err {
            EmbedError::ModelUnavailable(message) => assert!(message.contains("vocab.txt")),
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }
    }
}
