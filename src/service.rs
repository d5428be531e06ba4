// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-project index service facade.
//!
//! Owns the store, embedder, pipeline, debouncer, and poll timer for one
//! project. Instances live in a registry keyed by normalized project path.
//! The facade never throws into its caller: failures become structured
//! search responses or readiness transitions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::chunker::Chunker;
use crate::embeddings::{create_embedder, Embedder, EmbedderTokenCounter, ModelProvider};
use crate::error::ServiceError;
use crate::pipeline::{Pipeline, ProgressCallback};
use crate::registry::ArtifactRegistry;
use crate::scanner::Scanner;
use crate::search::SearchEngine;
use crate::store::Store;
use crate::types::{
    IndexConfig, IndexProgress, IndexResult, IndexStats, SearchOptions, SearchResponse,
};

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Shared progress handler.
pub type ProgressHandler = Arc<dyn Fn(IndexProgress) + Send + Sync>;

/// Registry of per-project services keyed by normalized absolute path.
static SERVICES: Lazy<StdMutex<HashMap<PathBuf, Arc<IndexService>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

/// Components owned by a ready service.
struct Inner {
    pipeline: Arc<Pipeline>,
    engine: Arc<SearchEngine>,
    store: Arc<Mutex<Store>>,
    poll_task: Option<JoinHandle<()>>,
}

/// Per-project semantic index service.
pub struct IndexService {
    project_root: PathBuf,
    config: IndexConfig,
    self_weak: Weak<IndexService>,
    state_tx: watch::Sender<ServiceState>,
    state_rx: watch::Receiver<ServiceState>,
    start_lock: Mutex<()>,
    reindex_lock: Mutex<()>,
    inner: StdMutex<Option<Inner>>,
    embedder_override: StdMutex<Option<Arc<dyn Embedder>>>,
    model_provider: StdMutex<Option<Arc<dyn ModelProvider>>>,
    progress_handler: StdMutex<Option<ProgressHandler>>,
    debounce_tasks: StdMutex<HashMap<PathBuf, JoinHandle<()>>>,
    last_index_result: StdMutex<Option<IndexResult>>,
    failure_message: StdMutex<Option<String>>,
}

impl IndexService {
    /// Create a service for a project without starting it.
    pub fn new(project_root: &Path, config: IndexConfig) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ServiceState::Uninitialized);
        Arc::new_cyclic(|weak| Self {
            project_root: normalize_path(project_root),
            config,
            self_weak: weak.clone(),
            state_tx,
            state_rx,
            start_lock: Mutex::new(()),
            reindex_lock: Mutex::new(()),
            inner: StdMutex::new(None),
            embedder_override: StdMutex::new(None),
            model_provider: StdMutex::new(None),
            progress_handler: StdMutex::new(None),
            debounce_tasks: StdMutex::new(HashMap::new()),
            last_index_result: StdMutex::new(None),
            failure_message: StdMutex::new(None),
        })
    }

    /// Fetch or create the singleton service for a project.
    pub fn for_project(project_root: &Path, config: IndexConfig) -> Arc<Self> {
        let key = normalize_path(project_root);
        let mut services = SERVICES.lock().unwrap();
        services
            .entry(key.clone())
            .or_insert_with(|| Self::new(&key, config))
            .clone()
    }

    /// Remove a project's service from the registry. The caller should
    /// `stop()` it first.
    pub fn evict_project(project_root: &Path) {
        let key = normalize_path(project_root);
        SERVICES.lock().unwrap().remove(&key);
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Inject a non-default embedder; effective on the next `start()`.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder_override.lock().unwrap() = Some(embedder);
    }

    /// Require model artifacts before initialization.
    pub fn set_model_provider(&self, provider: Arc<dyn ModelProvider>) {
        *self.model_provider.lock().unwrap() = Some(provider);
    }

    /// Observe indexing progress.
    pub fn set_progress_handler(&self, handler: ProgressHandler) {
        *self.progress_handler.lock().unwrap() = Some(handler);
    }

    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    pub fn is_initializing(&self) -> bool {
        self.state() == ServiceState::Initializing
    }

    /// Message describing why the service failed, if it did.
    pub fn failure_message(&self) -> Option<String> {
        self.failure_message.lock().unwrap().clone()
    }

    /// Watch readiness transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    /// Resolve when initialization leaves `initializing`; never errors.
    /// Returns `true` when the service came up ready.
    pub async fn wait_for_ready(&self) -> bool {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow() {
                ServiceState::Ready => return true,
                ServiceState::Failed => return false,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Idempotent start: initializes the store and embedder, then runs the
    /// initial index pass. Concurrent callers coalesce onto the same
    /// initialization; a failed start clears state so a later call retries.
    pub async fn start(&self) {
        let _guard = self.start_lock.lock().await;
        match self.state() {
            ServiceState::Ready | ServiceState::Initializing => return,
            _ => {}
        }
        let _ = self.state_tx.send(ServiceState::Initializing);
        *self.failure_message.lock().unwrap() = None;

        match self.initialize().await {
            Ok(result) => {
                *self.last_index_result.lock().unwrap() = Some(result);
                let _ = self.state_tx.send(ServiceState::Ready);
            }
            Err(e) => {
                tracing::error!(project = %self.project_root.display(), error = %e, "initialization failed");
                *self.failure_message.lock().unwrap() = Some(e.to_string());
                *self.inner.lock().unwrap() = None;
                let _ = self.state_tx.send(ServiceState::Failed);
            }
        }
    }

    async fn initialize(&self) -> Result<IndexResult, ServiceError> {
        if let Some(provider) = self.model_provider.lock().unwrap().clone() {
            provider.ensure_model().await?;
        }

        let embedder = self
            .embedder_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| create_embedder(&self.config));

        let store = Store::open(
            &self.project_root.to_string_lossy(),
            self.config.data_dir.as_deref(),
        )?;
        let store = Arc::new(Mutex::new(store));

        let registry = Arc::new(ArtifactRegistry::new());
        let counter = Arc::new(EmbedderTokenCounter(embedder.clone()));
        let chunker = Arc::new(Chunker::new(registry, counter, self.config.max_tokens));
        let scanner = Scanner::new(&self.config).map_err(|e| ServiceError::InitFailed(e.to_string()))?;

        let pipeline = Arc::new(Pipeline::new(
            chunker,
            embedder.clone(),
            store.clone(),
            scanner,
            self.config.match_reference_qualifier,
        ));
        let engine = Arc::new(SearchEngine::new(
            store.clone(),
            embedder.clone(),
            self.config.clone(),
        ));

        let result = {
            let _reindex = self.reindex_lock.lock().await;
            pipeline
                .process_initial(&[self.project_root.clone()], self.progress_callback().as_ref())
                .await?
        };

        let poll_task = self.spawn_poll_task(pipeline.clone());
        *self.inner.lock().unwrap() = Some(Inner {
            pipeline,
            engine,
            store,
            poll_task,
        });

        Ok(result)
    }

    fn progress_callback(&self) -> Option<ProgressCallback> {
        self.progress_handler
            .lock()
            .unwrap()
            .clone()
            .map(|handler| Box::new(move |p: IndexProgress| handler(p)) as ProgressCallback)
    }

    fn spawn_poll_task(&self, pipeline: Arc<Pipeline>) -> Option<JoinHandle<()>> {
        if self.config.poll_interval_secs == 0 {
            return None;
        }
        let weak = self.self_weak.clone();
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    return;
                };
                let _guard = service.reindex_lock.lock().await;
                let root = service.project_root.clone();
                if let Err(e) = pipeline.process_incremental(&[root], None).await {
                    tracing::warn!(error = %e, "poll reindex failed");
                }
            }
        }))
    }

    /// Best-effort immediate re-index for a file's directory, debounced per
    /// path with the configured collapse window. Events arriving during the
    /// window coalesce into one run.
    pub fn notify_file_change(&self, path: &Path) {
        if !self.is_available() {
            return;
        }
        let path = path.to_path_buf();
        let dir = path.parent().unwrap_or(&self.project_root).to_path_buf();
        let weak = self.self_weak.clone();
        let delay = Duration::from_millis(self.config.debounce_ms);

        let mut tasks = self.debounce_tasks.lock().unwrap();
        if let Some(previous) = tasks.remove(&path) {
            previous.abort();
        }
        let task_key = path.clone();
        tasks.insert(
            task_key.clone(),
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(service) = weak.upgrade() else {
                    return;
                };
                let pipeline = {
                    let inner = service.inner.lock().unwrap();
                    inner.as_ref().map(|i| i.pipeline.clone())
                };
                if let Some(pipeline) = pipeline {
                    let _guard = service.reindex_lock.lock().await;
                    if let Err(e) = pipeline.process_incremental(&[dir], None).await {
                        tracing::warn!(path = %task_key.display(), error = %e, "incremental reindex failed");
                    }
                }
                service.debounce_tasks.lock().unwrap().remove(&task_key);
            }),
        );
    }

    /// Run an incremental pass over the whole project now.
    pub async fn reindex(&self) -> Result<IndexResult, ServiceError> {
        let pipeline = {
            let inner = self.inner.lock().unwrap();
            inner
                .as_ref()
                .map(|i| i.pipeline.clone())
                .ok_or(ServiceError::NotReady)?
        };
        let _guard = self.reindex_lock.lock().await;
        let result = pipeline
            .process_incremental(&[self.project_root.clone()], self.progress_callback().as_ref())
            .await?;
        *self.last_index_result.lock().unwrap() = Some(result.clone());
        Ok(result)
    }

    /// Result of the most recent full or incremental pass.
    pub fn last_index_result(&self) -> Option<IndexResult> {
        self.last_index_result.lock().unwrap().clone()
    }

    /// Search the index. Never errors: not-ready and empty-index conditions
    /// come back as structured responses the caller can act on.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResponse {
        if !self.is_available() {
            return SearchResponse::unavailable(
                self.failure_message()
                    .unwrap_or_else(|| "semantic index is not ready; fall back to text search".to_string()),
            );
        }

        let (engine, store) = {
            let inner = self.inner.lock().unwrap();
            match inner.as_ref() {
                Some(i) => (i.engine.clone(), i.store.clone()),
                None => {
                    return SearchResponse::unavailable("semantic index is not ready".to_string())
                }
            }
        };

        match store.lock().await.count() {
            Ok(0) => {
                return SearchResponse::empty_index(
                    "no indexed chunks yet; try again after indexing or fall back to text search",
                )
            }
            Ok(_) => {}
            Err(e) => return SearchResponse::unavailable(e.to_string()),
        }

        match engine.search(query, options).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "search failed");
                SearchResponse::unavailable(e.to_string())
            }
        }
    }

    /// Index statistics, when ready.
    pub async fn stats(&self) -> Result<IndexStats, ServiceError> {
        let store = {
            let inner = self.inner.lock().unwrap();
            inner
                .as_ref()
                .map(|i| i.store.clone())
                .ok_or(ServiceError::NotReady)?
        };
        let stats = store.lock().await.stats()?;
        Ok(stats)
    }

    /// Release all resources: poll timer, debounce tasks, store, embedder.
    /// Errors are swallowed; a later `start()` rebuilds everything.
    pub async fn stop(&self) {
        let _guard = self.start_lock.lock().await;

        for (_, task) in self.debounce_tasks.lock().unwrap().drain() {
            task.abort();
        }
        // Wait out any in-flight re-index; teardown is not mid-file.
        let _reindex = self.reindex_lock.lock().await;

        if let Some(inner) = self.inner.lock().unwrap().take() {
            if let Some(task) = inner.poll_task {
                task.abort();
            }
        }
        let _ = self.state_tx.send(ServiceState::Uninitialized);
    }
}

/// Normalize to an absolute, symlink-free path where possible.
fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    use crate::error::EmbedError;
    use crate::types::EmbeddingVector;

    /// Deterministic embedder: hashes words into a small dense space.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn name(&self) -> &str {
            "hash"
        }
        fn model(&self) -> &str {
            "hash-test"
        }
        fn dimensions(&self) -> usize {
            16
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut values = vec![0.0f32; 16];
                    for word in t.split_whitespace() {
                        let mut h: u32 = 2166136261;
                        for b in word.bytes() {
                            h = h.wrapping_mul(16777619) ^ b as u32;
                        }
                        values[(h % 16) as usize] += 1.0;
                    }
                    EmbeddingVector::new(values)
                })
                .collect())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    fn test_config(data_dir: &Path) -> IndexConfig {
        IndexConfig {
            data_dir: Some(data_dir.to_path_buf()),
            poll_interval_secs: 0,
            debounce_ms: 10,
            ..Default::default()
        }
    }

    fn write_project(root: &Path) {
        let apis = root.join("apis");
        fs::create_dir_all(&apis).unwrap();
        fs::write(
            apis.join("OrderApi.xml"),
            r#"<api name="OrderApi" context="/orders">
  <resource methods="GET" uri-template="/list">
    <inSequence>
      <log level="full"/>
      <respond/>
    </inSequence>
  </resource>
</api>"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_and_search() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_project(project.path());

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.start().await;

        assert!(service.wait_for_ready().await);
        assert!(service.is_available());

        // Query words occur verbatim in the indexed chunk, so both the
        // dense and sparse sides score it.
        let response = service
            .search("resource inSequence respond", &SearchOptions::default())
            .await;
        assert_eq!(response.status, crate::types::SearchStatus::Ok);
        assert!(!response.results.is_empty());
    }

    #[tokio::test]
    async fn test_search_before_start_is_structured() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        let service = IndexService::new(project.path(), test_config(data.path()));

        let response = service.search("anything", &SearchOptions::default()).await;
        assert_eq!(
            response.status,
            crate::types::SearchStatus::EmbeddingServiceUnavailable
        );
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_project_reports_empty_index() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.start().await;
        assert!(service.wait_for_ready().await);

        let response = service.search("anything", &SearchOptions::default()).await;
        assert_eq!(response.status, crate::types::SearchStatus::EmptyIndex);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_project(project.path());

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.start().await;
        let first = service.last_index_result().unwrap();
        assert!(first.chunks_embedded > 0);

        service.start().await;
        let second = service.last_index_result().unwrap();
        // Second start is a no-op; the result is unchanged.
        assert_eq!(first.chunks_embedded, second.chunks_embedded);
    }

    #[tokio::test]
    async fn test_model_provider_failure_fails_readiness() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_project(project.path());

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.set_model_provider(Arc::new(crate::embeddings::DirModelProvider::new(
            project.path().join("no-model-here"),
        )));
        service.start().await;

        assert!(!service.wait_for_ready().await);
        assert_eq!(service.state(), ServiceState::Failed);
        assert!(service.failure_message().unwrap().contains("model"));
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_project(project.path());

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.start().await;
        assert!(service.wait_for_ready().await);

        service.stop().await;
        assert!(!service.is_available());

        service.start().await;
        assert!(service.wait_for_ready().await);
        // Warm start: nothing re-embedded on an unchanged project.
        let result = service.last_index_result().unwrap();
        assert_eq!(result.chunks_embedded, 0);
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance() {
        let project = tempdir().unwrap();
        let config = IndexConfig::default();
        let a = IndexService::for_project(project.path(), config.clone());
        let b = IndexService::for_project(project.path(), config);
        assert!(Arc::ptr_eq(&a, &b));
        IndexService::evict_project(project.path());
    }

    #[tokio::test]
    async fn test_notify_file_change_reindexes() {
        let project = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_project(project.path());

        let service = IndexService::new(project.path(), test_config(data.path()));
        service.set_embedder(Arc::new(HashEmbedder));
        service.start().await;
        assert!(service.wait_for_ready().await);
        let before = service.stats().await.unwrap().total_chunks;

        let api = project.path().join("apis").join("PaymentApi.xml");
        fs::write(
            &api,
            r#"<api name="PaymentApi" context="/payments">
  <resource methods="POST" uri-template="/charge">
    <inSequence>
      <respond/>
    </inSequence>
  </resource>
</api>"#,
        )
        .unwrap();

        service.notify_file_change(&api);
        // Debounce window is 10ms in tests; give the task time to run.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let after = service.stats().await.unwrap().total_chunks;
        assert!(after > before);
    }
}
