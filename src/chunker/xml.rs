// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event-based XML parsing into an owned element tree.
//!
//! Preserves element order, attribute order, and namespace prefixes.
//! Comments and processing instructions are skipped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ChunkError;

/// A parsed XML element with its children in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    /// Tag name including any namespace prefix.
    pub tag: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub self_closing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    /// Tag without its namespace prefix.
    pub fn local_name(&self) -> &str {
        crate::registry::local_name(&self.tag)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        crate::registry::attr_value(&self.attrs, key)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Number of distinct child element tags; feeds the structural
    /// complexity boundary rule.
    pub fn child_tag_kinds(&self) -> usize {
        let mut kinds: Vec<&str> = self.child_elements().map(|e| e.tag.as_str()).collect();
        kinds.sort();
        kinds.dedup();
        kinds.len()
    }

    /// Non-blank text children.
    pub fn text_children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Text(t) if !t.trim().is_empty() => Some(t.as_str()),
            _ => None,
        })
    }
}

fn element_from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<XmlElement, String> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .to_string();
        attrs.push((key, value));
    }
    Ok(XmlElement {
        tag,
        attrs,
        children: Vec::new(),
        self_closing,
    })
}

/// Parse a document into its root element.
pub fn parse_document(content: &str, path: &str) -> Result<XmlElement, ChunkError> {
    let parse_err = |message: String| ChunkError::Parse {
        path: path.to_string(),
        message,
    };

    let mut reader = Reader::from_str(content);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let element = element_from_start(&start, false).map_err(parse_err)?;
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from_start(&start, true).map_err(parse_err)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(element)),
                    None if root.is_none() => root = Some(element),
                    None => {}
                }
            }
            Ok(Event::End(_)) => {
                let finished = stack
                    .pop()
                    .ok_or_else(|| parse_err("unbalanced close tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(finished)),
                    None if root.is_none() => root = Some(finished),
                    None => {}
                }
            }
            Ok(Event::Text(text)) => {
                let unescaped = text.unescape().map_err(|e| parse_err(e.to_string()))?;
                if !unescaped.trim().is_empty() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(unescaped.to_string()));
                    }
                }
            }
            Ok(Event::CData(data)) => {
                let text = String::from_utf8_lossy(&data).to_string();
                if !text.trim().is_empty() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
            }
            // Comments, PIs, doctype, and the XML declaration carry no
            // semantic content for chunking.
            Ok(Event::Comment(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) | Ok(Event::Decl(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
        }
    }

    root.ok_or_else(|| ChunkError::EmptyDocument(path.to_string()))
}
