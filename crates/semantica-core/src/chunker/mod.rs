//! Chunker (C3).
//!
//! Splits extracted text into overlapping passages, preserving character
//! offsets. Deterministic for identical input; never holds a reference
//! to the source file once called.

use std::path::Path;

use crate::config::ChunkerConfig;
use crate::hash::chunk_id;
use crate::types::Chunk;

const MIN_CHUNK_CHARS: usize = 50;

/// A single word token with its byte offset in the source text.
struct Word<'a> {
    text: &'a str,
    offset: usize,
}

fn tokenize(text: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut char_indices = text.char_indices().peekable();
    while let Some(&(start, ch)) = char_indices.peek() {
        if ch.is_whitespace() {
            char_indices.next();
            continue;
        }
        let mut end = start;
        while let Some(&(idx, c)) = char_indices.peek() {
            if c.is_whitespace() {
                break;
            }
            end = idx + c.len_utf8();
            char_indices.next();
        }
        words.push(Word {
            text: &text[start..end],
            offset: start,
        });
    }
    words
}

/// Split a single `(page, text)` segment into overlapping chunks.
///
/// `target_tokens`/`overlap_tokens` are word counts, matching spec.md
/// §4.3's "splits text on whitespace" rule. Adjacent chunks overlap by
/// `overlap_tokens` words; every chunk has at least
/// [`MIN_CHUNK_CHARS`] characters except the final one.
pub fn chunk_text(
    path: &Path,
    mtime: i64,
    ext: &str,
    title: &str,
    page: u32,
    text: &str,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let words = tokenize(text);
    if words.is_empty() {
        return Vec::new();
    }

    // No chunk may exceed `queue.maxTokensPerBatch / queue.batchSize`
    // tokens (spec.md §4.3); clamping the window itself, rather than
    // splitting after the fact, keeps every chunk within the ceiling by
    // construction.
    let target = config.target_tokens.max(1).min(config.max_chunk_tokens.max(1));
    let overlap = config.overlap_tokens.min(target.saturating_sub(1));
    let step = target - overlap;

    let mut chunks = Vec::new();
    let mut start_idx = 0;

    while start_idx < words.len() {
        let end_idx = (start_idx + target).min(words.len());
        let start_offset = words[start_idx].offset;
        let last_word = &words[end_idx - 1];
        let end_offset = last_word.offset + last_word.text.len();
        let chunk_text = &text[start_offset..end_offset];

        let is_final = end_idx >= words.len();
        if chunk_text.len() >= MIN_CHUNK_CHARS || is_final {
            chunks.push(Chunk {
                id: chunk_id(path, start_offset),
                path: path.to_path_buf(),
                mtime,
                page,
                offset: start_offset,
                text: chunk_text.to_string(),
                vector: Vec::new(),
                r#type: ext.to_string(),
                title: title.to_string(),
            });
        }

        if is_final {
            break;
        }
        start_idx += step.max(1);
    }

    chunks
}

/// Chunk every `(page, text)` segment of a document, concatenating the
/// resulting chunks in page order.
pub fn chunk_document(
    path: &Path,
    mtime: i64,
    segments: &[(u32, String)],
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    segments
        .iter()
        .flat_map(|(page, text)| chunk_text(path, mtime, &ext, &title, *page, text, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg(target: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            target_tokens: target,
            overlap_tokens: overlap,
            max_chunk_tokens: 1000,
        }
    }

    #[test]
    fn chunk_window_is_clamped_to_the_token_ceiling() {
        let words: Vec<String> = (0..50).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let path = PathBuf::from("/docs/a.txt");
        let mut config = cfg(200, 40);
        config.max_chunk_tokens = 10;
        let chunks = chunk_text(&path, 0, "txt", "a", 0, &text, &config);
        for chunk in &chunks {
            assert!(chunk.text.split_whitespace().count() <= 10);
        }
        assert!(chunks.len() > 1);
    }

    #[test]
    fn single_short_chunk_for_small_input() {
        let path = PathBuf::from("/docs/a.txt");
        let chunks = chunk_text(&path, 0, "txt", "a", 0, "hello world", &cfg(200, 40));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn adjacent_chunks_overlap_by_configured_words() {
        let words: Vec<String> = (0..20).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let path = PathBuf::from("/docs/a.txt");
        let chunks = chunk_text(&path, 0, "txt", "a", 0, &text, &cfg(10, 4));
        assert!(chunks.len() >= 2);
        // chunk 1 should contain the last 4 words of chunk 0
        let chunk0_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let overlap_words = &chunk0_words[chunk0_words.len() - 4..];
        for w in overlap_words {
            assert!(chunks[1].text.contains(w));
        }
    }

    #[test]
    fn offsets_are_strictly_increasing() {
        let words: Vec<String> = (0..50).map(|i| format!("token{i}")).collect();
        let text = words.join(" ");
        let path = PathBuf::from("/docs/a.txt");
        let chunks = chunk_text(&path, 0, "txt", "a", 0, &text, &cfg(10, 2));
        for pair in chunks.windows(2) {
            assert!(pair[1].offset > pair[0].offset);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let path = PathBuf::from("/docs/a.txt");
        let chunks = chunk_text(&path, 0, "txt", "a", 0, "   ", &cfg(200, 40));
        assert!(chunks.is_empty());
    }

    #[test]
    fn deterministic_for_identical_input() {
        let path = PathBuf::from("/docs/a.txt");
        let text = "one two three four five six seven eight nine ten";
        let a = chunk_text(&path, 0, "txt", "a", 0, text, &cfg(4, 1));
        let b = chunk_text(&path, 0, "txt", "a", 0, text, &cfg(4, 1));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.offset, y.offset);
            assert_eq!(x.id, y.id);
        }
    }
}
