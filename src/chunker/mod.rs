// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structure-aware XML chunking.
//!
//! Partitions an artifact into token-bounded, context-rich chunks by
//! recursive descent with exclusive top-down chunking: once an element is
//! emitted its subtree is never chunked again. Elements too large for the
//! token budget descend into their children instead; an oversized leaf is
//! force-emitted rather than silently dropped.

pub mod locate;
pub mod refs;
pub mod text;
pub mod xml;

use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use std::time::Instant;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::ChunkError;
use crate::merkle;
use crate::registry::{local_name, ArtifactMetadata, ArtifactRegistry};
use crate::types::{Chunk, SemanticIntent};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use locate::ElementLocator;
use xml::{XmlElement, XmlNode};

/// Token counting abstraction; backed by the embedder's tokenizer when one
/// is available.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Four-characters-per-token estimate used when no tokenizer is wired in.
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4).max(1)
    }
}

/// Structure-aware chunker for XML artifacts.
pub struct Chunker {
    registry: Arc<ArtifactRegistry>,
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
}

impl Chunker {
    pub fn new(
        registry: Arc<ArtifactRegistry>,
        counter: Arc<dyn TokenCounter>,
        max_tokens: usize,
    ) -> Self {
        Self {
            registry,
            counter,
            max_tokens,
        }
    }

    /// Chunk a file from disk.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>, ChunkError> {
        let content = std::fs::read_to_string(path)?;
        self.chunk_content(path, &content)
    }

    /// Chunk already-read content. Output order is emission order and every
    /// chunk carries the file hash of this exact content.
    pub fn chunk_content(&self, path: &Path, content: &str) -> Result<Vec<Chunk>, ChunkError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let path_str = path.to_string_lossy().to_string();
        let root = xml::parse_document(content, &path_str)?;
        let metadata = self
            .registry
            .detect_any_artifact(&root.tag, &root.attrs, &path_str);
        let root_context = artifact_context(&metadata);
        let file_hash = sha256_hex(content);
        let timestamp = chrono::Utc::now().timestamp_millis();

        let mut walker = Walker {
            chunker: self,
            locator: ElementLocator::new(content),
            chunks: Vec::new(),
            file_path: path_str,
            file_hash,
            resource_type: metadata.artifact_type.clone(),
            timestamp,
        };

        walker.walk(&root, &root_context, None, None);

        if walker.chunks.is_empty() {
            // Nothing in the tree qualified: the whole file becomes one chunk.
            let total_lines = content.lines().count().max(1) as u32;
            walker.emit(&root, &root_context, 1, total_lines, content, None);
        }

        let chunks = walker.chunks;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("chunker.chunk_content", start.elapsed());

        Ok(chunks)
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Context value for a detected artifact root.
fn artifact_context(metadata: &ArtifactMetadata) -> Value {
    let mut artifact = Map::new();
    artifact.insert(
        "type".to_string(),
        Value::String(metadata.artifact_type.clone()),
    );
    artifact.insert("name".to_string(), Value::String(metadata.name.clone()));
    if let Some(xmlns) = &metadata.xmlns {
        artifact.insert("xmlns".to_string(), Value::String(xmlns.clone()));
    }
    for (k, v) in &metadata.additional {
        artifact.insert(k.clone(), v.clone());
    }
    let mut context = Map::new();
    context.insert("artifact".to_string(), Value::Object(artifact));
    Value::Object(context)
}

struct Walker<'a> {
    chunker: &'a Chunker,
    locator: ElementLocator<'a>,
    chunks: Vec<Chunk>,
    file_path: String,
    file_hash: String,
    resource_type: String,
    timestamp: i64,
}

impl<'a> Walker<'a> {
    fn walk(
        &mut self,
        element: &XmlElement,
        context: &Value,
        parent_tag: Option<&str>,
        parent_index: Option<u32>,
    ) {
        let tag = &element.tag;
        let registry = &self.chunker.registry;
        let chunkable = registry.is_resource_type(tag)
            || registry.is_mediator(tag)
            || registry.is_semantic_boundary(
                tag,
                &element.attrs,
                element.child_tag_kinds(),
                parent_tag,
            );

        // Connector elements with element children expand into per-property
        // chunks; only a childless connector emits itself.
        let connector_expansion = tag.contains('.') && element.child_elements().next().is_some();

        if !chunkable || connector_expansion {
            let updated = self.context_with(context, element);
            self.descend_children(element, &updated, parent_index);
            return;
        }

        let Some((start, end)) = self.locator.locate(tag) else {
            tracing::debug!(tag = %tag, file = %self.file_path, "element not locatable, descending");
            let updated = self.context_with(context, element);
            self.descend_children(element, &updated, parent_index);
            return;
        };
        let (start, end) = self.locator.expand_wrappers(start, end);
        let slice = self.locator.slice_lines(start, end);

        let references = refs::extract_references(&slice);
        let metadata = text::format_metadata(context, &references);
        let embedding_text = text::build_embedding_text(&metadata, &slice);
        let tokens = self.chunker.counter.count_tokens(&embedding_text);

        let within_budget = tokens <= self.chunker.max_tokens;
        let atomic = registry.is_atomic(tag);
        let leaf = element.child_elements().next().is_none();

        if within_budget || atomic || leaf {
            // The element's own attributes are already in the content, so the
            // chunk is emitted with the parent context.
            self.emit(element, context, start, end, &slice, parent_index);
            self.locator.advance_past(end);
            return;
        }

        let updated = self.context_with(context, element);
        let before = self.chunks.len();
        self.descend_children(element, &updated, parent_index);
        if self.chunks.len() == before {
            // Oversized leaf in practice: recursion yielded nothing, so emit
            // the element whole rather than dropping it.
            self.emit(element, context, start, end, &slice, parent_index);
            self.locator.advance_past(end);
        }
    }

    fn descend_children(&mut self, element: &XmlElement, context: &Value, parent_index: Option<u32>) {
        let connector_parent = element.tag.contains('.');
        for node in &element.children {
            match node {
                XmlNode::Element(child) => {
                    self.walk(child, context, Some(&element.tag), parent_index)
                }
                XmlNode::Text(t) if connector_parent && !t.trim().is_empty() => {
                    self.emit_text_child(element, t, context, parent_index);
                }
                XmlNode::Text(_) => {}
            }
        }
    }

    /// Bare text directly under a connector element becomes its own chunk.
    fn emit_text_child(
        &mut self,
        parent: &XmlElement,
        text_value: &str,
        context: &Value,
        parent_index: Option<u32>,
    ) {
        let Some((start, end)) = self.locator.locate_text(text_value) else {
            return;
        };
        let slice = self.locator.slice_lines(start, end);
        self.emit(parent, context, start, end, &slice, parent_index);
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        element: &XmlElement,
        context: &Value,
        start: u32,
        end: u32,
        slice: &str,
        parent_index: Option<u32>,
    ) {
        let references = refs::extract_references(slice);
        let metadata = text::format_metadata(context, &references);
        let embedding_text = text::build_embedding_text(&metadata, slice);

        let semantic_type = self.classify_type(&element.tag);
        let semantic_intent = classify_intent(&element.tag, slice);
        let content_hash =
            merkle::compute_chunk_hash(slice, &semantic_type, semantic_intent, context);

        let is_definition = refs::is_definition_type(&element.tag);
        let sequence_key = if is_definition {
            element
                .attr("name")
                .or_else(|| element.attr("key"))
                .map(str::to_string)
        } else {
            None
        };
        let resource_name = element
            .attr("name")
            .or_else(|| element.attr("key"))
            .or_else(|| element.attr("context"))
            .unwrap_or(element.local_name())
            .to_string();

        self.chunks.push(Chunk {
            id: None,
            file_path: self.file_path.clone(),
            file_hash: self.file_hash.clone(),
            chunk_index: self.chunks.len() as u32,
            start_line: start,
            end_line: end,
            resource_name,
            resource_type: self.resource_type.clone(),
            chunk_type: element.tag.clone(),
            parent_chunk_id: None,
            parent_index,
            embedding: None,
            content_hash,
            semantic_type,
            semantic_intent,
            context: context.clone(),
            sequence_key,
            is_sequence_definition: is_definition,
            referenced_sequences: references,
            timestamp: self.timestamp,
            embedding_text,
        });
    }

    fn context_with(&self, context: &Value, element: &XmlElement) -> Value {
        let mut map = context.as_object().cloned().unwrap_or_default();
        if let Some((_, metadata)) = self
            .chunker
            .registry
            .detect_artifact(&element.tag, &element.attrs)
        {
            if let Value::Object(artifact_map) = artifact_context(&metadata) {
                if let Some(artifact) = artifact_map.get("artifact") {
                    map.insert("artifact".to_string(), artifact.clone());
                }
            }
        } else if !element.attrs.is_empty() {
            let mut attrs = Map::new();
            for (k, v) in &element.attrs {
                attrs.insert(k.clone(), Value::String(v.clone()));
            }
            map.insert(element.local_name().to_string(), Value::Object(attrs));
        } else {
            // Attribute-less wrappers stay visible downstream.
            map.insert(
                element.local_name().to_string(),
                Value::String(element.local_name().to_string()),
            );
        }
        Value::Object(map)
    }

    fn classify_type(&self, tag: &str) -> String {
        let registry = &self.chunker.registry;
        if let Some(plugin) = registry.plugin_for_root(tag) {
            return plugin.id.to_string();
        }
        if registry.is_mediator(tag) {
            return "mediator".to_string();
        }
        if tag.contains('.') {
            return "connector".to_string();
        }
        if let Some((prefix, rest)) = tag.split_once(':') {
            if prefix.chars().all(|c| c.is_ascii_lowercase())
                && rest.starts_with(|c: char| c.is_ascii_uppercase())
            {
                return "policy".to_string();
            }
        }
        let local = local_name(tag);
        if local.starts_with(|c: char| c.is_ascii_uppercase()) {
            return "configuration".to_string();
        }
        if registry.is_boundary_tag(tag) || ArtifactRegistry::is_flow_keyword(tag) {
            return "boundary".to_string();
        }
        "component".to_string()
    }
}

fn classify_intent(tag: &str, content: &str) -> SemanticIntent {
    match local_name(tag) {
        "validate" | "filter" => SemanticIntent::Validation,
        "payloadFactory" | "enrich" | "xslt" | "datamapper" | "jsontransform" | "script"
        | "xquery" | "smooks" | "rewrite" => SemanticIntent::Transformation,
        "send" | "call" | "callout" | "endpoint" | "address" | "http" | "loadbalance"
        | "failover" => SemanticIntent::Delegation,
        "respond" | "loopback" => SemanticIntent::Response,
        "log" => SemanticIntent::Logging,
        "makefault" | "onError" | "faultSequence" | "throttle" => SemanticIntent::ErrorHandling,
        "dblookup" | "dbreport" | "query" | "sql" | "data" | "dataService" => {
            SemanticIntent::DataAccess
        }
        "sequence" | "api" | "proxy" | "resource" | "target" | "inSequence" | "outSequence"
        | "template" | "inboundEndpoint" => SemanticIntent::Mediation,
        _ => {
            if tag.contains('.') {
                SemanticIntent::Delegation
            } else if content.contains("fault") || content.contains("onError") {
                SemanticIntent::ErrorHandling
            } else {
                SemanticIntent::Processing
            }
        }
    }
}
