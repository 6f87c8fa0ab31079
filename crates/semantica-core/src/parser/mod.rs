//! Parser Registry (C1).
//!
//! Maps a file extension to a parser version and a text extractor
//! producing `(page, text)` segments. Each parser is pure with respect
//! to its input bytes; the registry itself owns no state beyond the
//! extension -> (version, extractor) table.
//!
//! The registry publishes a monotonically increasing `version(ext)`; a
//! bump forces re-indexing of every file of that extension (see
//! [`crate::decision::should_reindex`]).

pub mod registry;

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::encoding;
use crate::error::Result;

pub use registry::ParserRegistry;

/// A pure text extractor for one document format.
///
/// Implementations never touch the filesystem; they operate on text
/// already decoded by the Encoding Detector (C2).
pub trait DocumentParser: Send + Sync {
    /// Split `text` into page-tagged segments. Page is 1-based, or 0 when
    /// the format has no page concept (plain text, markdown, html).
    fn parse(&self, text: &str) -> Vec<(u32, String)>;
}

/// Trivial parser: the whole document is a single unpaged segment.
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, text: &str) -> Vec<(u32, String)> {
        vec![(0, text.to_string())]
    }
}

/// Markdown parser: strips the most common inline/block markup so the
/// chunker and embedder see prose rather than syntax noise.
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn parse(&self, text: &str) -> Vec<(u32, String)> {
        let stripped = strip_markdown(text);
        vec![(0, stripped)]
    }
}

fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_start_matches('#').trim_start();
        let line = line.trim_start_matches(['-', '*', '+']).trim_start();
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// HTML parser: strips tags and collapses whitespace, keeping only
/// visible text content.
pub struct HtmlParser;

impl DocumentParser for HtmlParser {
    fn parse(&self, text: &str) -> Vec<(u32, String)> {
        vec![(0, strip_html_tags(text))]
    }
}

fn strip_html_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `path`'s raw bytes into page-tagged text segments.
///
/// Returns `Ok(None)` for an unsupported extension, `Err` on I/O
/// failure, and `Ok(Some(vec![]))` for a corrupt document (logged, not
/// propagated, so the caller can mark the file `failed` without a panic
/// in the pipeline).
pub fn parse_file(
    registry: &ParserRegistry,
    path: &Path,
    bytes: &[u8],
) -> Result<Option<Vec<(u32, String)>>> {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Ok(None);
    };
    let Some(parser) = registry.parser(ext) else {
        return Ok(None);
    };

    let encoding = encoding::detect(bytes);
    let text = encoding::decode(bytes, encoding);
    if text.is_empty() && !bytes.is_empty() {
        warn!(path = %path.display(), "corrupt or empty document after decode");
        return Ok(Some(Vec::new()));
    }

    Ok(Some(parser.parse(&text)))
}

pub(crate) fn default_versions() -> HashMap<&'static str, u32> {
    HashMap::from([("txt", 1), ("md", 1), ("mdx", 1), ("html", 1), ("htm", 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_single_unpaged_segment() {
        let registry = ParserRegistry::new();
        let segments = parse_file(&registry, Path::new("a.txt"), b"hello world")
            .expect("parse")
            .expect("supported");
        assert_eq!(segments, vec![(0, "hello world".to_string())]);
    }

    #[test]
    fn unsupported_extension_returns_none() {
        let registry = ParserRegistry::new();
        let segments = parse_file(&registry, Path::new("a.zzz"), b"hello").expect("parse");
        assert!(segments.is_none());
    }

    #[test]
    fn markdown_strips_heading_markers() {
        let registry = ParserRegistry::new();
        let segments = parse_file(&registry, Path::new("a.md"), b"# Title\n\nbody text")
            .expect("parse")
            .expect("supported");
        assert_eq!(segments.len(), 1);
        assert!(segments[0].1.contains("Title"));
        assert!(!segments[0].1.contains('#'));
    }

    #[test]
    fn html_strips_tags() {
        let registry = ParserRegistry::new();
        let segments = parse_file(&registry, Path::new("a.html"), b"<p>hello <b>world</b></p>")
            .expect("parse")
            .expect("supported");
        assert_eq!(segments[0].1, "hello world");
    }
}
