// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding text construction.
//!
//! `embedding_text = formatted_metadata + " " + cleaned_content`. The cleaned
//! form drops XML structure and attribute quoting while keeping JSON payloads
//! inside `<format>`/`<args>` verbatim, since those carry the message shapes
//! the embedder should see unmangled.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Longest token kept after cleanup.
const MAX_TOKEN_LEN: usize = 100;

static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(format|args)[^>]*>(.*?)</(?:format|args)>").unwrap());
static DOUBLE_QUOTED_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"="([^"]*)""#).unwrap());
static SINGLE_QUOTED_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"='([^']*)'").unwrap());

/// Flatten a context map into `Key: k=v k=v` fragments with stable ordering,
/// plus a trailing `Uses:` list when references exist.
pub fn format_metadata(context: &Value, references: &[String]) -> String {
    let mut fragments: Vec<String> = Vec::new();

    if let Value::Object(map) = context {
        let mut keys: Vec<&String> = map.keys().collect();
        // Artifact context leads; it anchors every chunk of the file.
        keys.sort_by_key(|k| (k.as_str() != "artifact", k.as_str()));

        for key in keys {
            let label = capitalize(key);
            match &map[key] {
                Value::Object(inner) => {
                    let mut inner_keys: Vec<&String> = inner.keys().collect();
                    inner_keys.sort();
                    let pairs: Vec<String> = inner_keys
                        .into_iter()
                        .filter_map(|k| {
                            inner[k]
                                .as_str()
                                .map(|v| format!("{}={}", k, v))
                                .or_else(|| Some(format!("{}={}", k, inner[k])))
                        })
                        .collect();
                    fragments.push(format!("{}: {}", label, pairs.join(" ")));
                }
                Value::String(s) => fragments.push(format!("{}: {}", label, s)),
                other => fragments.push(format!("{}: {}", label, other)),
            }
        }
    }

    if !references.is_empty() {
        fragments.push(format!("Uses: {}", references.join(", ")));
    }

    fragments.join(" ")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Strip XML structure down to embeddable tokens.
pub fn clean_content(content: &str) -> String {
    // Hold JSON payloads out of the cleanup.
    let mut payloads: Vec<String> = Vec::new();
    let held_out = JSON_BLOCK
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let idx = payloads.len();
            payloads.push(caps[2].trim().to_string());
            format!(" __payload_{}__ ", idx)
        })
        .into_owned();

    let unquoted = DOUBLE_QUOTED_ATTR.replace_all(&held_out, "=$1");
    let unquoted = SINGLE_QUOTED_ATTR.replace_all(&unquoted, "=$1");

    let stripped = unquoted
        .replace("</", " ")
        .replace("/>", " ")
        .replace('<', " ")
        .replace('>', " ");

    let tokens: Vec<&str> = stripped
        .split_whitespace()
        .filter(|t| {
            if t.len() > MAX_TOKEN_LEN {
                return false;
            }
            if t.chars().count() == 1 {
                return t.chars().all(|c| c.is_ascii_digit());
            }
            true
        })
        .collect();

    let mut result = tokens.join(" ");
    for (idx, payload) in payloads.iter().enumerate() {
        result = result.replace(&format!("__payload_{}__", idx), payload);
    }
    result
}

/// The text handed to the embedder and mirrored into the FTS table.
pub fn build_embedding_text(metadata: &str, content: &str) -> String {
    let cleaned = clean_content(content);
    if metadata.is_empty() {
        cleaned
    } else if cleaned.is_empty() {
        metadata.to_string()
    } else {
        format!("{} {}", metadata, cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_metadata_orders_artifact_first() {
        let context = json!({
            "resource": {"methods": "GET", "uri-template": "/orders"},
            "artifact": {"type": "api", "name": "OrderApi"},
        });
        let formatted = format_metadata(&context, &[]);
        assert!(formatted.starts_with("Artifact: name=OrderApi type=api"));
        assert!(formatted.contains("Resource: methods=GET uri-template=/orders"));
    }

    #[test]
    fn test_format_metadata_is_deterministic() {
        let a: Value = serde_json::from_str(r#"{"x":{"b":"2","a":"1"},"artifact":{"type":"t","name":"n"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"artifact":{"name":"n","type":"t"},"x":{"a":"1","b":"2"}}"#).unwrap();
        assert_eq!(format_metadata(&a, &[]), format_metadata(&b, &[]));
    }

    #[test]
    fn test_format_metadata_uses_clause() {
        let refs = vec!["sequence:Audit".to_string(), "endpoint:Backend".to_string()];
        let formatted = format_metadata(&json!({}), &refs);
        assert_eq!(formatted, "Uses: sequence:Audit, endpoint:Backend");
    }

    #[test]
    fn test_format_metadata_string_entry() {
        let context = json!({"inSequence": "inSequence"});
        assert_eq!(format_metadata(&context, &[]), "InSequence: inSequence");
    }

    #[test]
    fn test_clean_content_strips_tags_and_quotes() {
        let cleaned = clean_content(r#"<log level="full" category="INFO"/>"#);
        assert_eq!(cleaned, "log level=full category=INFO");
    }

    #[test]
    fn test_clean_content_preserves_json_payload() {
        let content = r#"<payloadFactory media-type="json">
  <format>{"order": {"id": 1}}</format>
</payloadFactory>"#;
        let cleaned = clean_content(content);
        assert!(cleaned.contains(r#"{"order": {"id": 1}}"#));
        assert!(cleaned.contains("media-type=json"));
        assert!(!cleaned.contains('<'));
    }

    #[test]
    fn test_clean_content_single_char_filter() {
        let cleaned = clean_content("a 1 b 2 xy");
        assert_eq!(cleaned, "1 2 xy");
    }

    #[test]
    fn test_clean_content_drops_very_long_tokens() {
        let long = "x".repeat(150);
        let cleaned = clean_content(&format!("keep {} keep", long));
        assert_eq!(cleaned, "keep keep");
    }

    #[test]
    fn test_build_embedding_text_joins() {
        let text = build_embedding_text("Artifact: type=api", "<respond/>");
        assert_eq!(text, "Artifact: type=api respond");
    }

    #[test]
    fn test_build_embedding_text_empty_metadata() {
        assert_eq!(build_embedding_text("", "<drop/>"), "drop");
    }
}
