// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Incremental indexing pipeline.
//!
//! Orchestrates Scanner → Chunker → (reuse or embed) → Store. Chunk identity
//! across edits is the slot `(chunk_index, start_line, end_line)`; a slot
//! whose content hash is unchanged keeps its stored embedding, so re-running
//! over an unchanged project embeds nothing.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::chunker::Chunker;
use crate::embeddings::Embedder;
use crate::error::ServiceError;
use crate::merkle;
use crate::scanner::Scanner;
use crate::store::Store;
use crate::types::{Chunk, FileChange, IndexProgress, IndexResult, IndexStage};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Progress callback for indexing operations.
pub type ProgressCallback = Box<dyn Fn(IndexProgress) + Send + Sync>;

/// What to do with one freshly-chunked slot.
enum SlotAction {
    /// Same slot, same content hash: keep the stored embedding and id.
    Reuse(i64),
    /// Same slot, different hash: re-embed and overwrite.
    Reembed(i64),
    /// New slot: embed and insert.
    Insert,
}

/// Incremental indexing pipeline.
pub struct Pipeline {
    chunker: Arc<Chunker>,
    embedder: Arc<dyn Embedder>,
    store: Arc<Mutex<Store>>,
    scanner: Mutex<Scanner>,
    match_reference_qualifier: bool,
}

impl Pipeline {
    pub fn new(
        chunker: Arc<Chunker>,
        embedder: Arc<dyn Embedder>,
        store: Arc<Mutex<Store>>,
        scanner: Scanner,
        match_reference_qualifier: bool,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            scanner: Mutex::new(scanner),
            match_reference_qualifier,
        }
    }

    /// First pass after service start: warm-start the scanner from the store
    /// so untouched files are not re-indexed, then reconcile.
    pub async fn process_initial(
        &self,
        dirs: &[PathBuf],
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexResult, ServiceError> {
        {
            let hashes = self.store.lock().await.latest_file_hashes()?;
            self.scanner.lock().await.warm_start(hashes);
        }
        self.process_incremental(dirs, progress).await
    }

    /// Scan the directories and reconcile whatever changed.
    pub async fn process_incremental(
        &self,
        dirs: &[PathBuf],
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexResult, ServiceError> {
        report(
            progress,
            IndexStage::Scanning,
            format!("scanning {} directories", dirs.len()),
            0,
            0,
        );
        let changes = self.scanner.lock().await.scan_for_changes(dirs);
        self.process_changes(&changes, progress).await
    }

    /// Reconcile an explicit change set.
    pub async fn process_changes(
        &self,
        changes: &[FileChange],
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexResult, ServiceError> {
        let start = Instant::now();
        let mut result = IndexResult::default();
        let total = changes.len() as u32;

        for (i, change) in changes.iter().enumerate() {
            let file_index = i as u32 + 1;
            let detail = change.path.display().to_string();

            if !change.exists {
                report(progress, IndexStage::Updating, detail, file_index, total);
                let deleted = self.store.lock().await.delete_by_file(&path_str(&change.path))?;
                result.files_deleted += 1;
                result.chunks_deleted += deleted;
                continue;
            }

            report(progress, IndexStage::Embedding, detail.clone(), file_index, total);
            match self.process_file(change).await {
                Ok(file_result) => {
                    report(progress, IndexStage::Updating, detail, file_index, total);
                    result.files_processed += 1;
                    result.chunks_embedded += file_result.chunks_embedded;
                    result.chunks_reused += file_result.chunks_reused;
                    result.chunks_deleted += file_result.chunks_deleted;
                    result.chunks_failed += file_result.chunks_failed;
                }
                Err(e) => {
                    // One bad file never poisons the pass.
                    tracing::warn!(path = %change.path.display(), error = %e, "skipping file");
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        report(
            progress,
            IndexStage::Complete,
            format!(
                "{} embedded, {} reused, {} deleted",
                result.chunks_embedded, result.chunks_reused, result.chunks_deleted
            ),
            total,
            total,
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("pipeline.process_changes", start.elapsed());

        Ok(result)
    }

    /// Reconcile one changed file: rechunk, reuse or re-embed per slot,
    /// delete stale rows, and relink references.
    async fn process_file(&self, change: &FileChange) -> Result<IndexResult, ServiceError> {
        let mut result = IndexResult::default();
        let path = path_str(&change.path);

        let mut new_chunks = self.chunker.chunk_file(&change.path)?;

        let existing = self.store.lock().await.get_by_file(&path)?;
        let mut by_slot: HashMap<(u32, u32, u32), &Chunk> =
            existing.iter().map(|c| (c.slot(), c)).collect();

        if !existing.is_empty() {
            let old_tree = merkle::build_tree(&existing);
            let new_tree = merkle::build_tree(&new_chunks);
            let changed = merkle::find_changed_leaves(Some(&old_tree), &new_tree);
            tracing::debug!(
                path = %path,
                changed_leaves = changed.len(),
                total = new_chunks.len(),
                "merkle diff"
            );
        }

        // Pass 1: classify slots and gather texts that need the embedder.
        let mut actions: Vec<SlotAction> = Vec::with_capacity(new_chunks.len());
        let mut embed_texts: Vec<String> = Vec::new();
        for chunk in &new_chunks {
            let action = match by_slot.remove(&chunk.slot()) {
                Some(stored) if stored.content_hash == chunk.content_hash => {
                    SlotAction::Reuse(stored.id.unwrap_or_default())
                }
                Some(stored) => {
                    embed_texts.push(chunk.embedding_text.clone());
                    SlotAction::Reembed(stored.id.unwrap_or_default())
                }
                None => {
                    embed_texts.push(chunk.embedding_text.clone());
                    SlotAction::Insert
                }
            };
            actions.push(action);
        }

        let mut embeddings = if embed_texts.is_empty() {
            Vec::new().into_iter()
        } else {
            self.embedder
                .embed(&embed_texts)
                .await
                .map_err(|e| {
                    tracing::warn!(path = %path, error = %e, "embedding batch failed");
                    e
                })?
                .into_iter()
        };

        // Pass 2: write through, resolving parents via the emission-order map.
        let store = self.store.lock().await;
        let mut matched: HashSet<i64> = HashSet::new();
        let mut id_by_index: HashMap<u32, i64> = HashMap::new();
        let mut linkable: Vec<(i64, Vec<String>)> = Vec::new();

        for (chunk, action) in new_chunks.iter_mut().zip(actions) {
            chunk.parent_chunk_id = chunk
                .parent_index
                .and_then(|pi| id_by_index.get(&pi).copied());

            let id = match action {
                SlotAction::Reuse(id) => {
                    chunk.embedding = None;
                    store.update(id, chunk)?;
                    result.chunks_reused += 1;
                    id
                }
                SlotAction::Reembed(id) => match embeddings.next() {
                    Some(vector) if !vector.values.is_empty() => {
                        chunk.embedding = Some(vector.values);
                        store.update(id, chunk)?;
                        result.chunks_embedded += 1;
                        id
                    }
                    _ => {
                        tracing::warn!(path = %path, index = chunk.chunk_index, "no embedding, keeping stale chunk");
                        result.chunks_failed += 1;
                        matched.insert(id);
                        continue;
                    }
                },
                SlotAction::Insert => match embeddings.next() {
                    Some(vector) if !vector.values.is_empty() => {
                        chunk.embedding = Some(vector.values);
                        let id = store.insert(chunk)?;
                        result.chunks_embedded += 1;
                        id
                    }
                    _ => {
                        tracing::warn!(path = %path, index = chunk.chunk_index, "no embedding, skipping chunk");
                        result.chunks_failed += 1;
                        continue;
                    }
                },
            };

            matched.insert(id);
            id_by_index.insert(chunk.chunk_index, id);
            if !chunk.referenced_sequences.is_empty() {
                linkable.push((id, chunk.referenced_sequences.clone()));
            }
        }

        // Delete every pre-existing row not matched by a new slot.
        for stored in &existing {
            if let Some(id) = stored.id {
                if !matched.contains(&id) {
                    store.delete(id)?;
                    result.chunks_deleted += 1;
                }
            }
        }

        // Best-effort reference linking; unresolved references are skipped.
        for (caller, references) in linkable {
            store.delete_references_from(caller)?;
            for reference in references {
                if let Some(callee) =
                    store.find_definition(&reference, self.match_reference_qualifier)?
                {
                    store.link_reference(caller, callee, &reference)?;
                }
            }
        }

        Ok(result)
    }
}

fn path_str(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}

fn report(
    progress: Option<&ProgressCallback>,
    stage: IndexStage,
    detail: String,
    file_index: u32,
    total_files: u32,
) {
    if let Some(callback) = progress {
        callback(IndexProgress {
            stage,
            detail,
            file_index,
            total_files,
        });
    }
}
