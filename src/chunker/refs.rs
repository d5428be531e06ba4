// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reference extraction from chunk content.
//!
//! Scans raw XML for the six reference forms artifacts use to point at each
//! other and returns qualified `type:name` strings.

use once_cell::sync::Lazy;
use regex::Regex;

/// Artifact tags whose chunks define a referenceable entity.
const DEFINITION_TYPES: [&str; 4] = ["sequence", "localEntry", "endpoint", "template"];

static REFERENCE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"<sequence\s[^>]*?\bkey\s*=\s*"([^"]+)""#).unwrap(),
            "sequence",
        ),
        (
            Regex::new(r#"\bconfigKey\s*=\s*"([^"]+)""#).unwrap(),
            "localEntry",
        ),
        (
            Regex::new(r#"<endpoint\s[^>]*?\bkey\s*=\s*"([^"]+)""#).unwrap(),
            "endpoint",
        ),
        (
            Regex::new(r#"<call-template\s[^>]*?target\s*=\s*"([^"]+)""#).unwrap(),
            "template",
        ),
        (
            Regex::new(r#"\buseConfig\s*=\s*"([^"]+)""#).unwrap(),
            "config",
        ),
        (
            Regex::new(r#"<call-query\s[^>]*?href\s*=\s*"([^"]+)""#).unwrap(),
            "query",
        ),
    ]
});

/// All qualified references in the content, deduplicated, in pattern order.
pub fn extract_references(content: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for (pattern, kind) in REFERENCE_PATTERNS.iter() {
        for caps in pattern.captures_iter(content) {
            let qualified = format!("{}:{}", kind, &caps[1]);
            if !refs.contains(&qualified) {
                refs.push(qualified);
            }
        }
    }
    refs
}

/// Whether chunks of this tag define a referenceable artifact.
pub fn is_definition_type(chunk_type: &str) -> bool {
    DEFINITION_TYPES.contains(&crate::registry::local_name(chunk_type))
}
