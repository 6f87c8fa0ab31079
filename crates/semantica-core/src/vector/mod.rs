//! Vector Table (C6).
//!
//! A flat, append-oriented store of [`Chunk`]s keyed by `(path, offset,
//! page)`, persisted as a single bincode-encoded file. The
//! nearest-neighbor search itself is a linear cosine scan: spec.md §1
//! treats the ANN index structure as an opaque capability, so this
//! implementation favors a structure simple enough to reason about over
//! one tuned for scale (see DESIGN.md).

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Chunk;

/// Current on-disk schema version for the vector table (spec.md §6:
/// `./vectors/VERSION`).
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Default)]
struct VectorTableFile {
    dimension: usize,
    records: Vec<Chunk>,
}

/// Append/delete/query store for embedded chunks.
///
/// Single-writer: all mutating operations serialize on an internal
/// mutex, matching the Embedding Queue's single-writer batch processor
/// (spec.md §4.9 step 4). Readers see a consistent snapshot of whatever
/// was last committed.
pub struct VectorTable {
    path: PathBuf,
    dimension: usize,
    state: Mutex<Vec<Chunk>>,
}

impl VectorTable {
    /// Open (or create) the vector table at `path`, fixing its
    /// dimension for the lifetime of the file. Loading a file whose
    /// persisted dimension disagrees is a hard error: spec.md §9 Open
    /// Question 3 resolves changing models to a full rebuild, not a
    /// silent reshape.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let file = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                VectorTableFile { dimension, records: Vec::new() }
            } else {
                let loaded: VectorTableFile = bincode::deserialize(&bytes)?;
                if loaded.dimension != dimension {
                    return Err(Error::VectorStoreError(format!(
                        "vector table at {} was created with dimension {}, but the active model declares {dimension}",
                        path.display(),
                        loaded.dimension,
                    )));
                }
                loaded
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            VectorTableFile { dimension, records: Vec::new() }
        };

        let table = Self {
            path: path.to_path_buf(),
            dimension,
            state: Mutex::new(file.records),
        };
        {
            let state = table.state.lock();
            table.flush_locked(&state)?;
        }
        Ok(table)
    }

    /// Declared embedding dimension every appended vector must match.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check `./vectors/VERSION` against [`CURRENT_VERSION`] and write it
    /// if absent. Called during the `InitializingDb` stage, before the
    /// table is considered ready for traffic (spec.md §6, §7). A
    /// version this build doesn't recognize, in either direction, fails
    /// loudly rather than attempting a partial migration.
    pub fn migrate_if_needed(&self) -> Result<()> {
        let version_path = self.version_path();
        let stored = match fs::read_to_string(&version_path) {
            Ok(content) => content.trim().parse::<u32>().map_err(|e| {
                Error::VectorStoreError(format!(
                    "{} contains a non-integer version: {e}",
                    version_path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.write_version(&version_path, CURRENT_VERSION)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if stored > CURRENT_VERSION {
            return Err(Error::VectorStoreError(format!(
                "vector table at {} is schema version {stored}, newer than this build's version {CURRENT_VERSION}",
                self.path.display(),
            )));
        }

        if stored < CURRENT_VERSION {
            return Err(Error::VectorStoreError(format!(
                "vector table at {} is schema version {stored}; no migration path to version {CURRENT_VERSION} is implemented, and partial migration is never attempted",
                self.path.display(),
            )));
        }

        Ok(())
    }

    fn version_path(&self) -> PathBuf {
        self.path.with_file_name("VERSION")
    }

    fn write_version(&self, version_path: &Path, version: u32) -> Result<()> {
        if let Some(parent) = version_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(version_path, version.to_string())?;
        Ok(())
    }

    /// Append a batch of already-embedded chunks. Every `chunk.vector`
    /// must have length [`VectorTable::dimension`] and contain only
    /// finite values (spec.md §3 Invariant 3).
    pub fn append(&self, chunks: Vec<Chunk>) -> Result<()> {
        for chunk in &chunks {
            self.validate_vector(&chunk.vector)?;
        }
        let mut state = self.state.lock();
        state.extend(chunks);
        self.flush_locked(&state)
    }

    /// Remove every chunk for `path`. Returns the number removed.
    pub fn delete_where_path(&self, path: &Path) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.len();
        state.retain(|c| c.path != path);
        let removed = before - state.len();
        self.flush_locked(&state)?;
        Ok(removed)
    }

    /// Atomically replace every chunk for `path` with `chunks`: the
    /// delete and the append happen under a single lock acquisition, so
    /// a concurrent reader never observes `path` with zero chunks
    /// between the two steps (spec.md §4.6).
    pub fn reindex_path(&self, path: &Path, chunks: Vec<Chunk>) -> Result<()> {
        for chunk in &chunks {
            self.validate_vector(&chunk.vector)?;
        }
        let mut state = self.state.lock();
        state.retain(|c| c.path != path);
        state.extend(chunks);
        self.flush_locked(&state)
    }

    /// Cosine-similarity (dot product of unit vectors) nearest-neighbor
    /// search, restricted to chunks for which `filter` returns true (or
    /// all chunks, if `filter` is `None`).
    pub fn query_knn(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&Chunk) -> bool>,
    ) -> Result<Vec<(Chunk, f32)>> {
        self.validate_vector(vector)?;
        let state = self.state.lock();
        let mut scored: Vec<(Chunk, f32)> = state
            .iter()
            .filter(|c| filter.is_none_or(|f| f(c)))
            .map(|c| (c.clone(), dot(vector, &c.vector).max(0.0)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    /// Drop every committed chunk (`db.clear()`, spec.md §6).
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.clear();
        self.flush_locked(&state)
    }

    /// Total number of chunks currently committed.
    pub fn count(&self) -> usize {
        self.state.lock().len()
    }

    /// Every distinct source path with at least one committed chunk.
    pub fn distinct_paths(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        let mut paths: Vec<PathBuf> = state.iter().map(|c| c.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::VectorStoreError(format!(
                "expected a {}-dimensional vector, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::VectorStoreError("vector contains non-finite values".into()));
        }
        Ok(())
    }

    fn flush_locked(&self, records: &[Chunk]) -> Result<()> {
        let file = VectorTableFile {
            dimension: self.dimension,
            records: records.to_vec(),
        };
        let encoded = bincode::serialize(&file)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Dot product of two equal-length vectors.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2-normalize `vector` in place, so a later dot product is equivalent
/// to cosine similarity. A zero vector is left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, offset: usize, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: format!("{path}:{offset}"),
            path: PathBuf::from(path),
            mtime: 0,
            page: 0,
            offset,
            text: "text".into(),
            vector,
            r#type: "txt".into(),
            title: "title".into(),
        }
    }

    #[test]
    fn append_then_count_and_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 3).expect("open");
        table
            .append(vec![
                chunk("/docs/a.txt", 0, vec![1.0, 0.0, 0.0]),
                chunk("/docs/b.txt", 0, vec![0.0, 1.0, 0.0]),
            ])
            .expect("append");
        assert_eq!(table.count(), 2);

        let hits = table.query_knn(&[1.0, 0.0, 0.0], 1, None).expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.path, PathBuf::from("/docs/a.txt"));
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reindex_path_never_drops_to_zero_chunks_for_readers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        table.append(vec![chunk("/docs/a.txt", 0, vec![1.0, 0.0])]).expect("append");
        table
            .reindex_path(
                Path::new("/docs/a.txt"),
                vec![chunk("/docs/a.txt", 0, vec![0.0, 1.0])],
            )
            .expect("reindex");
        assert_eq!(table.count(), 1);
        let hits = table.query_knn(&[0.0, 1.0], 5, None).expect("query");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_where_path_removes_matching_chunks_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        table
            .append(vec![
                chunk("/docs/a.txt", 0, vec![1.0, 0.0]),
                chunk("/docs/b.txt", 0, vec![0.0, 1.0]),
            ])
            .expect("append");
        let removed = table.delete_where_path(Path::new("/docs/a.txt")).expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(table.distinct_paths(), vec![PathBuf::from("/docs/b.txt")]);
    }

    #[test]
    fn reopening_with_mismatched_dimension_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");
        VectorTable::open(&path, 3).expect("open");
        let err = VectorTable::open(&path, 4).expect_err("dimension mismatch");
        assert!(matches!(err, Error::VectorStoreError(_)));
    }

    #[test]
    fn append_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 3).expect("open");
        let err = table
            .append(vec![chunk("/docs/a.txt", 0, vec![1.0, 0.0])])
            .expect_err("wrong dimension");
        assert!(matches!(err, Error::VectorStoreError(_)));
    }

    #[test]
    fn clear_drops_every_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        table.append(vec![chunk("/docs/a.txt", 0, vec![1.0, 0.0])]).expect("append");
        table.clear().expect("clear");
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn migrate_if_needed_writes_version_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        let version_path = dir.path().join("VERSION");
        assert!(!version_path.exists());
        table.migrate_if_needed().expect("first migration writes VERSION");
        assert_eq!(fs::read_to_string(&version_path).expect("read VERSION"), "1");
        table.migrate_if_needed().expect("second call is a no-op");
    }

    #[test]
    fn migrate_if_needed_fails_loudly_on_newer_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        fs::write(dir.path().join("VERSION"), "99").expect("write VERSION");
        let err = table.migrate_if_needed().expect_err("newer version must error");
        assert!(matches!(err, Error::VectorStoreError(_)));
    }

    #[test]
    fn migrate_if_needed_fails_loudly_on_older_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = VectorTable::open(&dir.path().join("vectors.bin"), 2).expect("open");
        fs::write(dir.path().join("VERSION"), "0").expect("write VERSION");
        let err = table.migrate_if_needed().expect_err("older version must error, not partially migrate");
        assert!(matches!(err, Error::VectorStoreError(_)));
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
