// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end pipeline and search scenarios over a real on-disk project.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::Mutex;

use artidex::chunker::{Chunker, TokenCounter};
use artidex::embeddings::Embedder;
use artidex::error::EmbedError;
use artidex::pipeline::Pipeline;
use artidex::registry::ArtifactRegistry;
use artidex::scanner::{hash_bytes, Scanner};
use artidex::search::SearchEngine;
use artidex::store::Store;
use artidex::types::{EmbeddingVector, FileChange, IndexConfig, SearchOptions};

/// Deterministic embedder that hashes words into a small dense space and
/// counts how many texts it has embedded.
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn embedded(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; 32];
        for word in text.split_whitespace() {
            let mut h: u32 = 2166136261;
            for b in word.bytes() {
                h = h.wrapping_mul(16777619) ^ b as u32;
            }
            values[(h % 32) as usize] += 1.0;
        }
        values
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }
    fn model(&self) -> &str {
        "counting-test"
    }
    fn dimensions(&self) -> usize {
        32
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| EmbeddingVector::new(Self::vector_for(t)))
            .collect())
    }
    async fn is_available(&self) -> bool {
        true
    }
}

struct Fixture {
    pipeline: Pipeline,
    store: Arc<Mutex<Store>>,
    embedder: Arc<CountingEmbedder>,
    project: PathBuf,
}

fn fixture(project: &Path, data: &Path) -> Fixture {
    // Budget sized so an API file splits per resource while a small
    // sequence file stays one definition chunk.
    let config = IndexConfig {
        max_tokens: 96,
        ..Default::default()
    };
    let embedder = Arc::new(CountingEmbedder::new());
    let registry = Arc::new(ArtifactRegistry::new());
    let counter: Arc<dyn TokenCounter> = Arc::new(artidex::chunker::CharEstimateCounter);
    let chunker = Arc::new(Chunker::new(registry, counter, config.max_tokens));
    let store = Arc::new(Mutex::new(Store::open_in_dir(data).unwrap()));
    let scanner = Scanner::new(&config).unwrap();
    let pipeline = Pipeline::new(
        chunker,
        embedder.clone(),
        store.clone(),
        scanner,
        config.match_reference_qualifier,
    );
    Fixture {
        pipeline,
        store,
        embedder,
        project: project.to_path_buf(),
    }
}

fn write_api(dir: &Path, name: &str, context: &str, template_a: &str, template_b: &str) {
    let apis = dir.join("apis");
    std::fs::create_dir_all(&apis).unwrap();
    std::fs::write(
        apis.join(format!("{}.xml", name)),
        format!(
            r#"<api name="{name}" context="{context}">
  <resource methods="GET" uri-template="{template_a}">
    <inSequence>
      <log level="full"/>
      <sequence key="AuditSequence"/>
      <respond/>
    </inSequence>
  </resource>
  <resource methods="POST" uri-template="{template_b}">
    <inSequence>
      <payloadFactory media-type="json">
        <format>{{"status": "accepted"}}</format>
      </payloadFactory>
      <respond/>
    </inSequence>
  </resource>
</api>"#
        ),
    )
    .unwrap();
}

fn write_sequence(dir: &Path) {
    let sequences = dir.join("sequences");
    std::fs::create_dir_all(&sequences).unwrap();
    std::fs::write(
        sequences.join("AuditSequence.xml"),
        r#"<sequence name="AuditSequence">
  <log level="custom"/>
  <property name="auditId" expression="get-property('MessageID')"/>
</sequence>"#,
    )
    .unwrap();
}

fn changes_for(project: &Path) -> Vec<FileChange> {
    let mut paths: Vec<PathBuf> = walk_xml(project);
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            let content = std::fs::read(&path).unwrap();
            FileChange {
                hash: hash_bytes(&content),
                path,
                exists: true,
            }
        })
        .collect()
}

fn walk_xml(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in walkdir_lite(dir) {
        if entry.extension().and_then(|e| e.to_str()) == Some("xml") {
            out.push(entry);
        }
    }
    out
}

fn walkdir_lite(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(walkdir_lite(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}

#[tokio::test]
async fn steady_state_reuse_embeds_nothing() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    write_api(project.path(), "OrderApi", "/orders", "/list", "/create");
    write_sequence(project.path());

    let fx = fixture(project.path(), data.path());
    let changes = changes_for(&fx.project);

    let first = fx.pipeline.process_changes(&changes, None).await.unwrap();
    assert!(first.chunks_embedded > 0);
    assert_eq!(first.chunks_reused, 0);
    let total = fx.store.lock().await.count().unwrap();
    assert_eq!(first.chunks_embedded, total);
    let embedded_before = fx.embedder.embedded();

    // Re-run over the unchanged project: everything reuses, nothing embeds.
    let second = fx.pipeline.process_changes(&changes, None).await.unwrap();
    assert_eq!(second.chunks_embedded, 0);
    assert_eq!(second.chunks_reused, total);
    assert_eq!(second.chunks_deleted, 0);
    assert_eq!(fx.embedder.embedded(), embedded_before);
}

#[tokio::test]
async fn single_attribute_edit_reembeds_one_chunk() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    write_api(project.path(), "OrderApi", "/orders", "/list", "/create");

    let fx = fixture(project.path(), data.path());
    let changes = changes_for(&fx.project);
    fx.pipeline.process_changes(&changes, None).await.unwrap();

    // Rename one uri-template, keeping the file shape identical.
    write_api(project.path(), "OrderApi", "/orders", "/list-v2", "/create");
    let changes = changes_for(&fx.project);
    let result = fx.pipeline.process_changes(&changes, None).await.unwrap();

    assert_eq!(result.chunks_embedded, 1);
    assert!(result.chunks_reused >= 1);
    assert_eq!(result.chunks_deleted, 0);
}

#[tokio::test]
async fn file_deletion_removes_chunks_and_mirror_rows() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    write_api(project.path(), "OrderApi", "/orders", "/list", "/create");
    write_sequence(project.path());

    let fx = fixture(project.path(), data.path());
    let changes = changes_for(&fx.project);
    fx.pipeline.process_changes(&changes, None).await.unwrap();

    let seq_path = fx.project.join("sequences").join("AuditSequence.xml");
    let seq_chunks = {
        let store = fx.store.lock().await;
        store.get_by_file(&seq_path.to_string_lossy()).unwrap().len() as u32
    };
    assert!(seq_chunks > 0);
    let before = fx.store.lock().await.count().unwrap();

    std::fs::remove_file(&seq_path).unwrap();
    let deletion = vec![FileChange {
        path: seq_path.clone(),
        hash: String::new(),
        exists: false,
    }];
    let result = fx.pipeline.process_changes(&deletion, None).await.unwrap();

    assert_eq!(result.chunks_deleted, seq_chunks);
    let store = fx.store.lock().await;
    assert_eq!(store.count().unwrap(), before - seq_chunks);
    assert!(store.get_by_file(&seq_path.to_string_lossy()).unwrap().is_empty());
    // The FTS mirror stays bijective with the chunks table.
    assert_eq!(store.fts_count().unwrap(), store.count().unwrap());
}

#[tokio::test]
async fn references_link_to_definitions() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    write_sequence(project.path());
    write_api(project.path(), "OrderApi", "/orders", "/list", "/create");

    let fx = fixture(project.path(), data.path());
    // Definition first, caller second: ordering mirrors a project scan.
    let mut changes = changes_for(&fx.project);
    changes.sort_by_key(|c| !c.path.to_string_lossy().contains("sequences"));
    fx.pipeline.process_changes(&changes, None).await.unwrap();

    let store = fx.store.lock().await;
    let definition = store.find_definition("sequence:AuditSequence", false).unwrap();
    let definition = definition.expect("sequence definition indexed");

    let callers = store.references_to(definition).unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].1, "sequence:AuditSequence");

    let outgoing = store.references_from(callers[0].0).unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].0, definition);
}

#[tokio::test]
async fn slot_churn_deletes_stale_rows() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    write_api(project.path(), "OrderApi", "/orders", "/list", "/create");

    let fx = fixture(project.path(), data.path());
    let changes = changes_for(&fx.project);
    fx.pipeline.process_changes(&changes, None).await.unwrap();
    let before = fx.store.lock().await.count().unwrap();
    assert_eq!(before, 2);

    // Drop the second resource entirely; its slot must disappear.
    let api_path = fx.project.join("apis").join("OrderApi.xml");
    std::fs::write(
        &api_path,
        r#"<api name="OrderApi" context="/orders">
  <resource methods="GET" uri-template="/list">
    <inSequence>
      <log level="full"/>
      <sequence key="AuditSequence"/>
      <respond/>
    </inSequence>
  </resource>
</api>"#,
    )
    .unwrap();

    let changes = changes_for(&fx.project);
    let result = fx.pipeline.process_changes(&changes, None).await.unwrap();

    assert!(result.chunks_deleted >= 1);
    let store = fx.store.lock().await;
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.fts_count().unwrap(), 1);
}

/// Embedder with fixed vectors: the query and one chunk are paraphrases
/// (high cosine), the other chunk is an exact lexical match (BM25 favored)
/// but semantically further away.
struct TableEmbedder;

#[async_trait]
impl Embedder for TableEmbedder {
    fn name(&self) -> &str {
        "table"
    }
    fn model(&self) -> &str {
        "table-test"
    }
    fn dimensions(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| {
                let values = if t.contains("debit payment amount") {
                    vec![0.97, 0.24] // paraphrase, dense-favored
                } else if t.contains("charge the customer card now") {
                    vec![0.6, 0.8] // exact-phrase chunk, sparse-favored
                } else {
                    vec![1.0, 0.0] // the query itself
                };
                EmbeddingVector::new(values)
            })
            .collect())
    }
    async fn is_available(&self) -> bool {
        true
    }
}

/// Index the two payment APIs with the table embedder, returning the store
/// for engines with different configs to search over.
async fn index_payment_apis(project: &Path, data: &Path) -> Arc<Mutex<Store>> {
    let apis = project.join("apis");
    std::fs::create_dir_all(&apis).unwrap();
    // Chunk favored by dense similarity (paraphrase of the query).
    std::fs::write(
        apis.join("DebitApi.xml"),
        r#"<api name="DebitApi" context="/debit">
  <resource methods="POST" uri-template="/debit">
    <inSequence>
      <log description="debit payment amount"/>
      <respond/>
    </inSequence>
  </resource>
</api>"#,
    )
    .unwrap();
    // Chunk favored by BM25 (contains the exact query phrase).
    std::fs::write(
        apis.join("ChargeApi.xml"),
        r#"<api name="ChargeApi" context="/charge">
  <resource methods="POST" uri-template="/charge">
    <inSequence>
      <log description="charge the customer card now"/>
      <respond/>
    </inSequence>
  </resource>
</api>"#,
    )
    .unwrap();

    let config = IndexConfig::default();
    let embedder: Arc<dyn Embedder> = Arc::new(TableEmbedder);
    let registry = Arc::new(ArtifactRegistry::new());
    let counter: Arc<dyn TokenCounter> = Arc::new(artidex::chunker::CharEstimateCounter);
    let chunker = Arc::new(Chunker::new(registry, counter, config.max_tokens));
    let store = Arc::new(Mutex::new(Store::open_in_dir(data).unwrap()));
    let scanner = Scanner::new(&config).unwrap();
    let pipeline = Pipeline::new(chunker, embedder, store.clone(), scanner, false);

    let changes = changes_for(project);
    pipeline.process_changes(&changes, None).await.unwrap();
    store
}

#[tokio::test]
async fn hybrid_ordering_follows_fused_score() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    let store = index_payment_apis(project.path(), data.path()).await;

    let engine = SearchEngine::new(store, Arc::new(TableEmbedder), IndexConfig::default());
    let response = engine
        .search("charge the customer card", &SearchOptions::default())
        .await
        .unwrap();

    assert!(response.results.len() >= 2);
    // dense(paraphrase) ≈ 0.97 · 0.85 ≈ 0.846 with no sparse help;
    // dense(exact) ≈ 0.6 · 0.85 + 1.0 · 0.15 ≈ 0.66. Dense wins the fusion.
    assert!(response.results[0].file_path.contains("DebitApi"));
}

#[tokio::test]
async fn fusion_weights_come_from_config() {
    let project = tempdir().unwrap();
    let data = tempdir().unwrap();
    let store = index_payment_apis(project.path(), data.path()).await;

    // Sparse-dominant weights flip the outcome: the exact-phrase chunk wins
    // (0.15 · 0.6 + 0.85 · 1.0 ≈ 0.94) while the paraphrase falls below the
    // threshold (0.15 · 0.97 ≈ 0.15).
    let config = IndexConfig {
        dense_weight: 0.15,
        sparse_weight: 0.85,
        ..Default::default()
    };
    let engine = SearchEngine::new(store, Arc::new(TableEmbedder), config);
    let response = engine
        .search("charge the customer card", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].file_path.contains("ChargeApi"));
}
