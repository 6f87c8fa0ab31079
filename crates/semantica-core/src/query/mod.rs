//! Query Engine (C12).
//!
//! Embeds the query text, runs a nearest-neighbor scan against the Vector
//! Table, then groups the raw chunk hits by source path so the UI renders
//! one result per document rather than one per chunk.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedder::EmbedderSupervisor;
use crate::error::{Error, Result};
use crate::types::Hit;
use crate::vector::VectorTable;

/// Default number of passage previews kept per matching document.
const DEFAULT_PREVIEWS_PER_PATH: usize = 3;

/// Embeds queries and ranks Vector Table hits grouped by source path.
pub struct QueryEngine {
    embedder: Arc<EmbedderSupervisor>,
    vector_table: Arc<VectorTable>,
    previews_per_path: usize,
}

impl QueryEngine {
    pub fn new(embedder: Arc<EmbedderSupervisor>, vector_table: Arc<VectorTable>) -> Self {
        Self { embedder, vector_table, previews_per_path: DEFAULT_PREVIEWS_PER_PATH }
    }

    /// Override the number of passage previews kept per matching path.
    pub fn with_previews_per_path(mut self, n: usize) -> Self {
        self.previews_per_path = n.max(1);
        self
    }

    /// Run `text` as a query, returning up to `k` chunk matches collapsed
    /// into per-path hits, sorted by best score descending. An empty or
    /// whitespace-only query is rejected (spec.md §4.12).
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Hit>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Config { message: "query text must not be empty".into() });
        }

        let vectors = self.embedder.embed_with_retry(&[trimmed.to_string()], true).await?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| Error::EmbedBatchFailed {
            reason: "embedder returned no vector for query".into(),
        })?;

        let matches = self.vector_table.query_knn(&query_vector, k, None)?;
        Ok(group_by_path(matches, self.previews_per_path))
    }
}

fn group_by_path(matches: Vec<(crate::types::Chunk, f32)>, previews_per_path: usize) -> Vec<Hit> {
    let mut by_path: HashMap<_, Hit> = HashMap::new();
    let mut order = Vec::new();

    for (chunk, raw_score) in matches {
        let score = raw_score.max(0.0);
        let file_name = chunk
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        by_path
            .entry(chunk.path.clone())
            .and_modify(|hit| {
                if hit.preview.len() < previews_per_path {
                    hit.preview.push(chunk.text.clone());
                }
                if score > hit.score {
                    hit.score = score;
                    hit.page = if chunk.page == 0 { None } else { Some(chunk.page) };
                    hit.offset = chunk.offset;
                }
            })
            .or_insert_with(|| {
                order.push(chunk.path.clone());
                Hit {
                    path: chunk.path.clone(),
                    file_name,
                    score,
                    preview: vec![chunk.text.clone()],
                    page: if chunk.page == 0 { None } else { Some(chunk.page) },
                    offset: chunk.offset,
                }
            });
    }

    let mut hits: Vec<Hit> = order.into_iter().filter_map(|path| by_path.remove(&path)).collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;
    use std::path::PathBuf;

    fn chunk(path: &str, offset: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{path}:{offset}"),
            path: PathBuf::from(path),
            mtime: 0,
            page: 0,
            offset,
            text: text.to_string(),
            vector: Vec::new(),
            r#type: "txt".to_string(),
            title: path.to_string(),
        }
    }

    #[test]
    fn group_by_path_keeps_best_score_and_collects_previews() {
        let matches = vec![
            (chunk("/a.txt", 0, "first"), 0.5),
            (chunk("/a.txt", 10, "second"), 0.9),
            (chunk("/b.txt", 0, "other"), 0.7),
        ];
        let hits = group_by_path(matches, 3);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, PathBuf::from("/a.txt"));
        assert_eq!(hits[0].score, 0.9);
        assert_eq!(hits[0].offset, 10);
        assert_eq!(hits[0].preview.len(), 2);
        assert_eq!(hits[1].path, PathBuf::from("/b.txt"));
    }

    #[test]
    fn group_by_path_caps_previews_per_path() {
        let matches = vec![
            (chunk("/a.txt", 0, "one"), 0.1),
            (chunk("/a.txt", 1, "two"), 0.2),
            (chunk("/a.txt", 2, "three"), 0.3),
            (chunk("/a.txt", 3, "four"), 0.4),
        ];
        let hits = group_by_path(matches, 2);
        assert_eq!(hits[0].preview.len(), 2);
    }

    #[test]
    fn group_by_path_clamps_negative_scores_to_zero() {
        let matches = vec![(chunk("/a.txt", 0, "x"), -0.3)];
        let hits = group_by_path(matches, 3);
        assert_eq!(hits[0].score, 0.0);
    }
}
