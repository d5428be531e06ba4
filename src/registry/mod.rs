// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Artifact registry: classifies XML root tags and descendants into artifact
//! types, semantic boundaries, mediators, and atomic tags.
//!
//! This is the single place any list of known tags lives. All lookups accept
//! both namespaced (`wsp:Policy`) and local (`Policy`) forms.

pub mod plugins;

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

pub use plugins::builtin_plugins;

/// Metadata extracted from an artifact root element.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMetadata {
    pub artifact_type: String,
    pub name: String,
    pub xmlns: Option<String>,
    pub additional: Map<String, Value>,
}

impl ArtifactMetadata {
    pub fn unknown() -> Self {
        Self {
            artifact_type: "unknown".to_string(),
            name: "unknown".to_string(),
            xmlns: None,
            additional: Map::new(),
        }
    }
}

/// Pure metadata extractor: `(root_tag, attributes) → metadata`.
pub type ExtractFn = fn(&str, &[(String, String)]) -> ArtifactMetadata;

/// Declarative description of one artifact family.
#[derive(Debug, Clone)]
pub struct ArtifactPlugin {
    pub id: &'static str,
    pub root_tags: Vec<String>,
    pub semantic_boundaries: Vec<String>,
    pub mediator_tags: Vec<String>,
    pub atomic_tags: Vec<String>,
    pub extract: ExtractFn,
}

/// Attributes that identify an element as addressable on its own.
const IDENTIFYING_ATTRS: [&str; 4] = ["name", "key", "context", "id"];

/// Local names that always mark a flow boundary.
const FLOW_KEYWORDS: [&str; 6] = ["query", "operation", "resource", "config", "validate", "header"];

/// Strip the namespace prefix from a tag.
pub fn local_name(tag: &str) -> &str {
    match tag.rsplit_once(':') {
        Some((_, local)) => local,
        None => tag,
    }
}

/// Look up an attribute value by key.
pub fn attr_value<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Registry of artifact plugins with aggregate fast-lookup sets.
pub struct ArtifactRegistry {
    plugins: Vec<ArtifactPlugin>,
    boundaries: HashSet<String>,
    mediators: HashSet<String>,
    atomics: HashSet<String>,
    root_index: HashMap<String, usize>,
}

impl ArtifactRegistry {
    /// Registry with the twelve built-in plugins.
    pub fn new() -> Self {
        let mut registry = Self {
            plugins: Vec::new(),
            boundaries: HashSet::new(),
            mediators: HashSet::new(),
            atomics: HashSet::new(),
            root_index: HashMap::new(),
        };
        for plugin in builtin_plugins() {
            registry.register(plugin);
        }
        registry
    }

    /// Register an additional plugin, rebuilding the aggregate sets for it.
    pub fn register(&mut self, plugin: ArtifactPlugin) {
        let idx = self.plugins.len();
        for tag in &plugin.root_tags {
            self.root_index.insert(tag.clone(), idx);
            self.root_index.insert(local_name(tag).to_string(), idx);
        }
        for tag in &plugin.semantic_boundaries {
            self.boundaries.insert(tag.clone());
            self.boundaries.insert(local_name(tag).to_string());
        }
        for tag in &plugin.mediator_tags {
            self.mediators.insert(tag.clone());
            self.mediators.insert(local_name(tag).to_string());
        }
        for tag in &plugin.atomic_tags {
            self.atomics.insert(tag.clone());
            self.atomics.insert(local_name(tag).to_string());
        }
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[ArtifactPlugin] {
        &self.plugins
    }

    /// Registry set membership, full or local form.
    fn set_hit(set: &HashSet<String>, tag: &str) -> bool {
        set.contains(tag) || set.contains(local_name(tag))
    }

    pub fn is_mediator(&self, tag: &str) -> bool {
        Self::set_hit(&self.mediators, tag)
    }

    /// Membership in the aggregate boundary set alone (rule 1).
    pub fn is_boundary_tag(&self, tag: &str) -> bool {
        Self::set_hit(&self.boundaries, tag)
    }

    /// Membership in the standard flow keyword set (rule 5).
    pub fn is_flow_keyword(tag: &str) -> bool {
        FLOW_KEYWORDS.contains(&local_name(tag))
    }

    pub fn is_atomic(&self, tag: &str) -> bool {
        Self::set_hit(&self.atomics, tag)
    }

    pub fn is_resource_type(&self, tag: &str) -> bool {
        self.root_index.contains_key(tag) || self.root_index.contains_key(local_name(tag))
    }

    pub fn plugin_for_root(&self, tag: &str) -> Option<&ArtifactPlugin> {
        self.root_index
            .get(tag)
            .or_else(|| self.root_index.get(local_name(tag)))
            .map(|&idx| &self.plugins[idx])
    }

    /// Boundary rules, applied in order; first hit wins.
    ///
    /// 1. Registry boundary set (full or local name).
    /// 2. Connector tag (`http.post`, `ai.agent`).
    /// 3. Policy-like `prefix:LocalName`.
    /// 4. Declarative config: uppercase local name, no dot.
    /// 5. Standard flow keyword.
    /// 6. Any identifying attribute.
    /// 7. Direct child of a connector parent.
    /// 8. Structural complexity: two or more distinct child tag kinds.
    pub fn is_semantic_boundary(
        &self,
        tag: &str,
        attrs: &[(String, String)],
        child_tag_kinds: usize,
        parent_tag: Option<&str>,
    ) -> bool {
        if Self::set_hit(&self.boundaries, tag) {
            return true;
        }
        if tag.contains('.') {
            return true;
        }
        let local = local_name(tag);
        if let Some((prefix, rest)) = tag.split_once(':') {
            if !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_lowercase())
                && rest.starts_with(|c: char| c.is_ascii_uppercase())
            {
                return true;
            }
        }
        if local.starts_with(|c: char| c.is_ascii_uppercase()) && !local.contains('.') {
            return true;
        }
        if FLOW_KEYWORDS.contains(&local) {
            return true;
        }
        if attrs
            .iter()
            .any(|(k, _)| IDENTIFYING_ATTRS.contains(&k.as_str()))
        {
            return true;
        }
        if parent_tag.is_some_and(|p| p.contains('.')) {
            return true;
        }
        child_tag_kinds >= 2
    }

    /// Detect an artifact from its root tag; returns the owning plugin and
    /// its extracted metadata.
    pub fn detect_artifact(
        &self,
        root_tag: &str,
        attrs: &[(String, String)],
    ) -> Option<(&ArtifactPlugin, ArtifactMetadata)> {
        let plugin = self.plugin_for_root(root_tag)?;
        let metadata = (plugin.extract)(root_tag, attrs);
        Some((plugin, metadata))
    }

    /// Detect an artifact with a folder-name fallback, never failing.
    pub fn detect_any_artifact(
        &self,
        root_tag: &str,
        attrs: &[(String, String)],
        path: &str,
    ) -> ArtifactMetadata {
        if let Some((_, metadata)) = self.detect_artifact(root_tag, attrs) {
            return metadata;
        }
        if let Some(artifact_type) = folder_artifact_type(path) {
            let name = IDENTIFYING_ATTRS
                .iter()
                .find_map(|key| attr_value(attrs, key))
                .unwrap_or(local_name(root_tag));
            return ArtifactMetadata {
                artifact_type: artifact_type.to_string(),
                name: name.to_string(),
                xmlns: attr_value(attrs, "xmlns").map(str::to_string),
                additional: Map::new(),
            };
        }
        ArtifactMetadata::unknown()
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a project folder segment to an artifact type.
fn folder_artifact_type(path: &str) -> Option<&'static str> {
    const FOLDERS: [(&str, &str); 12] = [
        ("/apis/", "api"),
        ("/sequences/", "sequence"),
        ("/endpoints/", "endpoint"),
        ("/proxy-services/", "proxy"),
        ("/inbound-endpoints/", "inboundEndpoint"),
        ("/message-processors/", "messageProcessor"),
        ("/message-stores/", "messageStore"),
        ("/local-entries/", "localEntry"),
        ("/templates/", "template"),
        ("/tasks/", "task"),
        ("/data-services/", "dataService"),
        ("/policies/", "policy"),
    ];
    let normalized = path.replace('\\', "/");
    FOLDERS
        .iter()
        .find(|(folder, _)| normalized.contains(folder))
        .map(|&(_, artifact_type)| artifact_type)
}
