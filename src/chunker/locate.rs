// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Line-range resolution against the original document text.
//!
//! Parsed elements carry no positions, so ranges are recovered by a
//! depth-counting scan from a cursor that advances monotonically with
//! emission order. Located ranges are then expanded outward over bare
//! structural wrapper tags so the chunk stays syntactically self-contained.

use once_cell::sync::Lazy;
use regex::Regex;

/// Look-back bound for wrapper expansion, lines.
const WRAPPER_LOOK_BACK: u32 = 5;
/// Look-forward bound for wrapper expansion, lines.
const WRAPPER_LOOK_FORWARD: u32 = 10;

static BARE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<([A-Za-z][A-Za-z0-9_-]*)>\s*$").unwrap());

/// Resolves element line ranges against the original text.
pub struct ElementLocator<'a> {
    text: &'a str,
    /// Byte offset of each line start.
    line_starts: Vec<usize>,
    lines: Vec<&'a str>,
    cursor: usize,
}

impl<'a> ElementLocator<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0usize];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            text,
            line_starts,
            lines: text.lines().collect(),
            cursor: 0,
        }
    }

    /// 1-based line containing a byte offset.
    fn line_of(&self, offset: usize) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }

    /// Find the next occurrence of `<tag` at or after `from`, where the tag
    /// name is followed by a delimiter.
    fn find_open(&self, tag: &str, from: usize) -> Option<usize> {
        let needle = format!("<{}", tag);
        let bytes = self.text.as_bytes();
        let mut search_from = from;
        while let Some(rel) = self.text.get(search_from..)?.find(&needle) {
            let pos = search_from + rel;
            let after = pos + needle.len();
            let delimited = match bytes.get(after) {
                None => true,
                Some(&b) => b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' || b == b'>' || b == b'/',
            };
            if delimited {
                return Some(pos);
            }
            search_from = pos + 1;
        }
        None
    }

    /// End offset of the tag opened at `open`, skipping quoted attribute values.
    fn end_of_start_tag(&self, open: usize) -> Option<(usize, bool)> {
        let bytes = self.text.as_bytes();
        let mut i = open;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'>' => {
                        let self_closing = i > 0 && bytes[i - 1] == b'/';
                        return Some((i, self_closing));
                    }
                    _ => {}
                },
            }
            i += 1;
        }
        None
    }

    /// Locate the next element with this tag, returning its inclusive
    /// 1-based line range. Advances the cursor just past the opening `<`
    /// so nested children remain findable while the same element is not.
    pub fn locate(&mut self, tag: &str) -> Option<(u32, u32)> {
        let open = self.find_open(tag, self.cursor)?;
        self.cursor = open + 1;

        let (start_tag_end, self_closing) = self.end_of_start_tag(open)?;
        let start_line = self.line_of(open);
        if self_closing {
            return Some((start_line, self.line_of(start_tag_end)));
        }

        let close_needle = format!("</{}", tag);
        let mut depth = 1u32;
        let mut scan = start_tag_end + 1;
        while depth > 0 {
            let rest = self.text.get(scan..)?;
            let next_lt = rest.find('<')? + scan;
            if self.text[next_lt..].starts_with("<!--") {
                scan = self.text[next_lt..].find("-->").map(|r| next_lt + r + 3)?;
                continue;
            }
            if self.text[next_lt..].starts_with("<![CDATA[") {
                scan = self.text[next_lt..].find("]]>").map(|r| next_lt + r + 3)?;
                continue;
            }
            if self.text[next_lt..].starts_with(&close_needle) {
                let after = next_lt + close_needle.len();
                let trailing_ok = self.text[after..]
                    .trim_start()
                    .starts_with('>');
                if trailing_ok {
                    depth -= 1;
                    if depth == 0 {
                        let gt = self.text[after..].find('>')? + after;
                        return Some((start_line, self.line_of(gt)));
                    }
                }
                scan = after;
                continue;
            }
            if let Some(nested) = self.find_open(tag, next_lt) {
                if nested == next_lt {
                    let (nested_end, nested_self_closing) = self.end_of_start_tag(nested)?;
                    if !nested_self_closing {
                        depth += 1;
                    }
                    scan = nested_end + 1;
                    continue;
                }
            }
            scan = next_lt + 1;
        }
        None
    }

    /// Expand a range outward over bare structural wrappers like `<then>`
    /// or `<inSequence>` so the chunk remains well formed. Look-back and
    /// look-forward are both bounded.
    pub fn expand_wrappers(&self, start: u32, end: u32) -> (u32, u32) {
        let mut start = start;
        let mut end = end;

        for _ in 0..WRAPPER_LOOK_BACK {
            if start <= 1 {
                break;
            }
            let above = self.lines[(start - 2) as usize];
            let Some(caps) = BARE_OPEN.captures(above) else {
                break;
            };
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let close = format!("</{}>", name);

            let mut matched_close = None;
            let last = (end + WRAPPER_LOOK_FORWARD).min(self.lines.len() as u32);
            for candidate in (end + 1)..=last {
                let line = self.lines[(candidate - 1) as usize];
                if line.trim().is_empty() {
                    continue;
                }
                if line.trim() == close {
                    matched_close = Some(candidate);
                }
                break;
            }

            match matched_close {
                Some(close_line) => {
                    start -= 1;
                    end = close_line;
                }
                None => break,
            }
        }

        (start, end)
    }

    /// Locate a bare text run, returning the line range it occupies.
    /// Used for text children of connector-style elements.
    pub fn locate_text(&mut self, text: &str) -> Option<(u32, u32)> {
        let needle = text.trim();
        if needle.is_empty() {
            return None;
        }
        let first_line = needle.lines().next()?.trim();
        let start_line = self.line_of(self.cursor.min(self.text.len().saturating_sub(1)));
        for (idx, line) in self.lines.iter().enumerate().skip(start_line.saturating_sub(1) as usize) {
            if line.contains(first_line) {
                let span = needle.lines().count() as u32;
                let start = idx as u32 + 1;
                return Some((start, start + span - 1));
            }
        }
        None
    }

    /// Move the cursor past an emitted range so later searches cannot land
    /// inside an already-chunked region.
    pub fn advance_past(&mut self, end_line: u32) {
        let next = self
            .line_starts
            .get(end_line as usize)
            .copied()
            .unwrap_or(self.text.len());
        self.cursor = self.cursor.max(next);
    }

    /// Slice of the original text covering an inclusive 1-based line range.
    pub fn slice_lines(&self, start: u32, end: u32) -> String {
        let start_idx = (start.saturating_sub(1)) as usize;
        let end_idx = (end as usize).min(self.lines.len());
        self.lines[start_idx..end_idx].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
<api name=\"A\" context=\"/a\">
  <resource methods=\"GET\" uri-template=\"/x\">
    <inSequence>
      <log level=\"full\"/>
      <send/>
    </inSequence>
  </resource>
  <resource methods=\"POST\" uri-template=\"/y\">
    <inSequence>
      <respond/>
    </inSequence>
  </resource>
</api>";

    #[test]
    fn test_locate_nested_element() {
        let mut locator = ElementLocator::new(DOC);
        let (start, end) = locator.locate("resource").unwrap();
        assert_eq!((start, end), (2, 7));
    }

    #[test]
    fn test_locate_advances_to_sibling() {
        let mut locator = ElementLocator::new(DOC);
        locator.locate("resource").unwrap();
        let (start, end) = locator.locate("resource").unwrap();
        assert_eq!((start, end), (8, 12));
    }

    #[test]
    fn test_self_closing_single_line() {
        let mut locator = ElementLocator::new(DOC);
        let (start, end) = locator.locate("log").unwrap();
        assert_eq!(start, end);
        assert_eq!(start, 4);
    }

    #[test]
    fn test_nested_same_tag_depth_counting() {
        let doc = "<seq>\n  <filter>\n    <filter>\n      <log/>\n    </filter>\n  </filter>\n</seq>";
        let mut locator = ElementLocator::new(doc);
        let (start, end) = locator.locate("filter").unwrap();
        assert_eq!((start, end), (2, 6));
    }

    #[test]
    fn test_wrapper_expansion() {
        let doc = "\
<proxy name=\"P\">
  <target>
    <inSequence>
      <log level=\"full\"/>
    </inSequence>
  </target>
</proxy>";
        let mut locator = ElementLocator::new(doc);
        let (start, end) = locator.locate("log").unwrap();
        assert_eq!((start, end), (4, 4));
        // log engulfs <inSequence> and then <target>
        let (start, end) = locator.expand_wrappers(start, end);
        assert_eq!((start, end), (2, 6));
    }

    #[test]
    fn test_wrapper_expansion_skips_attributed_tags() {
        let doc = "\
<proxy name=\"P\">
  <target inSequence=\"main\">
    <log level=\"full\"/>
  </target>
</proxy>";
        let mut locator = ElementLocator::new(doc);
        let (start, end) = locator.locate("log").unwrap();
        let expanded = locator.expand_wrappers(start, end);
        assert_eq!(expanded, (start, end));
    }

    #[test]
    fn test_slice_lines() {
        let mut locator = ElementLocator::new(DOC);
        let (start, end) = locator.locate("inSequence").unwrap();
        let slice = locator.slice_lines(start, end);
        assert!(slice.starts_with("    <inSequence>"));
        assert!(slice.ends_with("</inSequence>"));
    }

    #[test]
    fn test_missing_tag_returns_none() {
        let mut locator = ElementLocator::new(DOC);
        assert!(locator.locate("nothing").is_none());
    }

    #[test]
    fn test_tag_name_delimiter_respected() {
        // "resourceGroup" must not match a search for "resource"
        let doc = "<x>\n  <resourceGroup/>\n  <resource name=\"r\"/>\n</x>";
        let mut locator = ElementLocator::new(doc);
        let (start, end) = locator.locate("resource").unwrap();
        assert_eq!((start, end), (3, 3));
    }
}
