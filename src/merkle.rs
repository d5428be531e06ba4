// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Content hashing and hierarchical change detection.
//!
//! Chunk hashes are SHA-256 over a canonical JSON encoding so that logically
//! equal inputs (attribute order, whitespace) hash identically across runs.
//! The tree groups chunks artifact → resource → sequence → leaf and lets the
//! pipeline diff two snapshots in O(changed).

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Chunk, SemanticIntent};

/// Deterministic JSON encoding: object keys sorted, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a chunk's content together with its semantic metadata.
///
/// The encoding is canonical, so two chunks with logically equal metadata
/// always share a hash regardless of map insertion order.
pub fn compute_chunk_hash(
    content: &str,
    semantic_type: &str,
    semantic_intent: SemanticIntent,
    context: &Value,
) -> String {
    let envelope = serde_json::json!({
        "content": content,
        "type": semantic_type,
        "intent": semantic_intent.as_str(),
        "context": context,
    });
    sha256_hex(&canonical_json(&envelope))
}

/// Node in the hierarchical hash tree. Leaves carry a chunk index.
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub hash: String,
    pub children: BTreeMap<String, MerkleNode>,
    pub chunk_index: Option<u32>,
}

impl MerkleNode {
    fn leaf(hash: String, chunk_index: u32) -> Self {
        Self {
            hash,
            children: BTreeMap::new(),
            chunk_index: Some(chunk_index),
        }
    }

    fn interior(children: BTreeMap<String, MerkleNode>) -> Self {
        // BTreeMap iterates in label order, which gives the determinism the
        // interior hash relies on.
        let joined: Vec<&str> = children.values().map(|c| c.hash.as_str()).collect();
        Self {
            hash: sha256_hex(&joined.join("|")),
            children,
            chunk_index: None,
        }
    }

    fn collect_leaves(&self, out: &mut Vec<u32>) {
        if let Some(idx) = self.chunk_index {
            out.push(idx);
        }
        for child in self.children.values() {
            child.collect_leaves(out);
        }
    }
}

/// Label under which a chunk groups at the resource level, if any.
fn group_label(chunk: &Chunk, key: &str) -> Option<String> {
    let entry = chunk.context.get(key)?;
    match entry {
        Value::Object(map) => {
            let id = map
                .get("name")
                .or_else(|| map.get("uri-template"))
                .or_else(|| map.get("key"))
                .and_then(|v| v.as_str())
                .unwrap_or(key);
            Some(format!("{}:{}", key, id))
        }
        Value::String(s) => Some(format!("{}:{}", key, s)),
        _ => None,
    }
}

/// Build the hierarchical hash tree for one file's chunks.
pub fn build_tree(chunks: &[Chunk]) -> MerkleNode {
    // artifact → resource → sequence → leaf; absent levels collapse upward.
    let mut artifact_groups: BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, MerkleNode>>>> =
        BTreeMap::new();

    for chunk in chunks {
        let artifact = format!("{}:{}", chunk.resource_type, artifact_name(chunk));
        let resource = group_label(chunk, "resource").unwrap_or_else(|| "-".to_string());
        let sequence = group_label(chunk, "sequence").unwrap_or_else(|| "-".to_string());
        let leaf_label = format!("{}:{}", chunk.chunk_index, chunk.chunk_type);

        artifact_groups
            .entry(artifact)
            .or_default()
            .entry(resource)
            .or_default()
            .entry(sequence)
            .or_default()
            .insert(
                leaf_label,
                MerkleNode::leaf(chunk.content_hash.clone(), chunk.chunk_index),
            );
    }

    let artifacts: BTreeMap<String, MerkleNode> = artifact_groups
        .into_iter()
        .map(|(label, resources)| {
            let resource_nodes: BTreeMap<String, MerkleNode> = resources
                .into_iter()
                .map(|(label, sequences)| {
                    let sequence_nodes: BTreeMap<String, MerkleNode> = sequences
                        .into_iter()
                        .map(|(label, leaves)| (label, MerkleNode::interior(leaves)))
                        .collect();
                    (label, MerkleNode::interior(sequence_nodes))
                })
                .collect();
            (label, MerkleNode::interior(resource_nodes))
        })
        .collect();

    MerkleNode::interior(artifacts)
}

fn artifact_name(chunk: &Chunk) -> String {
    chunk
        .context
        .get("artifact")
        .and_then(|a| a.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Chunk indices of leaves whose hashes differ between two snapshots.
///
/// Subtrees with identical interior hashes are pruned without descending.
/// Labels present only in the old tree (deletions) are ignored; a missing
/// old tree means every leaf changed.
pub fn find_changed_leaves(old: Option<&MerkleNode>, new: &MerkleNode) -> Vec<u32> {
    let mut changed = Vec::new();
    match old {
        None => new.collect_leaves(&mut changed),
        Some(old_node) => diff_nodes(old_node, new, &mut changed),
    }
    changed
}

fn diff_nodes(old: &MerkleNode, new: &MerkleNode, changed: &mut Vec<u32>) {
    if old.hash == new.hash {
        return;
    }
    if new.chunk_index.is_some() {
        new.collect_leaves(changed);
        return;
    }
    for (label, new_child) in &new.children {
        match old.children.get(label) {
            Some(old_child) => diff_nodes(old_child, new_child, changed),
            None => new_child.collect_leaves(changed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_chunk(index: u32, chunk_type: &str, content_hash: &str, context: Value) -> Chunk {
        Chunk {
            id: None,
            file_path: "/p/a.xml".to_string(),
            file_hash: "fh".to_string(),
            chunk_index: index,
            start_line: 1,
            end_line: 2,
            resource_name: "r".to_string(),
            resource_type: "api".to_string(),
            chunk_type: chunk_type.to_string(),
            parent_chunk_id: None,
            parent_index: None,
            embedding: None,
            content_hash: content_hash.to_string(),
            semantic_type: "api".to_string(),
            semantic_intent: SemanticIntent::Mediation,
            context,
            sequence_key: None,
            is_sequence_definition: false,
            referenced_sequences: Vec::new(),
            timestamp: 0,
            embedding_text: String::new(),
        }
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let encoded = canonical_json(&a);
        assert_eq!(encoded, r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn test_chunk_hash_deterministic_over_key_order() {
        let ctx1: Value = serde_json::from_str(r#"{"artifact":{"type":"api","name":"A"}}"#).unwrap();
        let ctx2: Value = serde_json::from_str(r#"{"artifact":{"name":"A","type":"api"}}"#).unwrap();
        let h1 = compute_chunk_hash("<log/>", "mediator", SemanticIntent::Logging, &ctx1);
        let h2 = compute_chunk_hash("<log/>", "mediator", SemanticIntent::Logging, &ctx2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_chunk_hash_changes_with_content() {
        let ctx = json!({});
        let h1 = compute_chunk_hash("a", "mediator", SemanticIntent::Logging, &ctx);
        let h2 = compute_chunk_hash("b", "mediator", SemanticIntent::Logging, &ctx);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_missing_old_tree_means_all_changed() {
        let chunks = vec![
            test_chunk(0, "resource", "h0", json!({"artifact": {"name": "A"}})),
            test_chunk(1, "log", "h1", json!({"artifact": {"name": "A"}})),
        ];
        let tree = build_tree(&chunks);
        let mut changed = find_changed_leaves(None, &tree);
        changed.sort();
        assert_eq!(changed, vec![0, 1]);
    }

    #[test]
    fn test_identical_trees_prune_everything() {
        let chunks = vec![
            test_chunk(0, "resource", "h0", json!({"artifact": {"name": "A"}})),
            test_chunk(1, "log", "h1", json!({"artifact": {"name": "A"}})),
        ];
        let old = build_tree(&chunks);
        let new = build_tree(&chunks);
        assert_eq!(old.hash, new.hash);
        assert!(find_changed_leaves(Some(&old), &new).is_empty());
    }

    #[test]
    fn test_single_leaf_change_detected() {
        let ctx = json!({"artifact": {"name": "A"}, "resource": {"name": "r1"}});
        let old_chunks = vec![
            test_chunk(0, "resource", "h0", ctx.clone()),
            test_chunk(1, "log", "h1", ctx.clone()),
        ];
        let mut new_chunks = old_chunks.clone();
        new_chunks[1].content_hash = "h1-changed".to_string();

        let old = build_tree(&old_chunks);
        let new = build_tree(&new_chunks);
        assert_eq!(find_changed_leaves(Some(&old), &new), vec![1]);
    }

    #[test]
    fn test_deleted_leaves_ignored() {
        let ctx = json!({"artifact": {"name": "A"}});
        let old_chunks = vec![
            test_chunk(0, "resource", "h0", ctx.clone()),
            test_chunk(1, "log", "h1", ctx.clone()),
        ];
        let new_chunks = vec![test_chunk(0, "resource", "h0", ctx)];

        let old = build_tree(&old_chunks);
        let new = build_tree(&new_chunks);
        assert!(find_changed_leaves(Some(&old), &new).is_empty());
    }
}
