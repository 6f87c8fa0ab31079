//! Embedding Queue (C9).
//!
//! A bounded, batched, backpressured pipeline from parsed-but-unembedded
//! [`Chunk`]s to a committed Vector Table entry. One [`EmbeddingQueue::submit`]
//! call owns a single file end to end: pack its chunks into batches bounded
//! by both `batchSize` and `maxTokensPerBatch`, embed each batch via the
//! supervisor with retry, and commit all embedded chunks for that file in
//! one [`VectorTable::reindex_path`] call once the last batch succeeds.
//!
//! Chunks for a single file are *not* written to the Vector Table batch by
//! batch: spec.md §4.9's cancellation contract states a canceled file is
//! left in its prior status with no rollback required because "no partial
//! chunks were committed before the file's final write" — only a
//! single atomic commit per file satisfies that together with the
//! Vector Table's own no-empty-window reindex guarantee.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::embedder::EmbedderSupervisor;
use crate::error::Result;
use crate::file_status::FileStatusRepository;
use crate::stats_cache::StatsCache;
use crate::types::{now_ms, Chunk, FileState, FileStatus, ProgressState};
use crate::vector::VectorTable;

/// Progress/outcome events emitted as a file moves through the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Emitted after every batch embeds and is accounted for.
    Progress { path: PathBuf, processed_chunks: usize, total_chunks: usize },
    /// Emitted once the file's chunks commit to the Vector Table.
    FileComplete { path: PathBuf },
    /// Emitted when the file fails after retries; chunks are rolled back.
    FileFailed { path: PathBuf, error: String },
    /// Emitted when a file's processing is canceled mid-flight.
    FileCanceled { path: PathBuf },
}

/// Atomic counters backing `index.progress()` (spec.md §6).
#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    processing: AtomicU64,
    done: AtomicU64,
    errors: AtomicU64,
}

struct BackpressureGate {
    depth: AtomicU64,
    notify: Notify,
    max_queue_size: u64,
    backpressure_threshold: u64,
}

impl BackpressureGate {
    fn new(max_queue_size: u64, backpressure_threshold: u64) -> Self {
        Self { depth: AtomicU64::new(0), notify: Notify::new(), max_queue_size, backpressure_threshold }
    }

    async fn reserve(&self, n: u64) {
        loop {
            let current = self.depth.load(Ordering::SeqCst);
            if current + n <= self.max_queue_size {
                self.depth.fetch_add(n, Ordering::SeqCst);
                return;
            }
            self.notify.notified().await;
        }
    }

    fn release(&self, n: u64) {
        let prev = self.depth.fetch_sub(n, Ordering::SeqCst);
        if prev.saturating_sub(n) <= self.backpressure_threshold {
            self.notify.notify_waiters();
        }
    }
}

/// Bounded, batched, backpressured producer to embedder-to-writer pipeline.
pub struct EmbeddingQueue {
    config: QueueConfig,
    vector_table: Arc<VectorTable>,
    file_status: Arc<FileStatusRepository>,
    embedder: Arc<EmbedderSupervisor>,
    stats: Arc<StatsCache>,
    gate: BackpressureGate,
    cancellations: DashMap<PathBuf, CancellationToken>,
    events: mpsc::Sender<QueueEvent>,
    counters: Counters,
    paused: AtomicBool,
    resumed: Notify,
}

impl EmbeddingQueue {
    pub fn new(
        config: QueueConfig,
        vector_table: Arc<VectorTable>,
        file_status: Arc<FileStatusRepository>,
        embedder: Arc<EmbedderSupervisor>,
        stats: Arc<StatsCache>,
        events: mpsc::Sender<QueueEvent>,
    ) -> Self {
        Self {
            gate: BackpressureGate::new(config.max_queue_size as u64, config.backpressure_threshold as u64),
            config,
            vector_table,
            file_status,
            embedder,
            stats,
            cancellations: DashMap::new(),
            events,
            counters: Counters::default(),
            paused: AtomicBool::new(false),
            resumed: Notify::new(),
        }
    }

    /// Submit every chunk extracted from `path` for embedding and commit.
    /// Suspends the caller until the queue's depth allows accepting
    /// `chunks.len()` more entries (spec.md §4.9, point 1), and while the
    /// queue is paused (`index.pause()`, spec.md §6).
    pub async fn submit(&self, path: PathBuf, chunks: Vec<Chunk>, new_hash: String, parser_version: u32) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        self.counters.queued.fetch_add(chunks.len() as u64, Ordering::SeqCst);
        while self.paused.load(Ordering::SeqCst) {
            self.resumed.notified().await;
        }

        self.gate.reserve(chunks.len() as u64).await;
        self.counters.queued.fetch_sub(chunks.len() as u64, Ordering::SeqCst);
        self.counters.processing.fetch_add(chunks.len() as u64, Ordering::SeqCst);

        let token = CancellationToken::new();
        self.cancellations.insert(path.clone(), token.clone());

        let result = self.process_file(&path, chunks.clone(), &token).await;
        self.gate.release(chunks.len() as u64);
        self.cancellations.remove(&path);
        self.counters.processing.fetch_sub(chunks.len() as u64, Ordering::SeqCst);

        match result {
            ProcessOutcome::Committed => {
                self.file_status.upsert(&FileStatus {
                    path: path.clone(),
                    status: FileState::Indexed,
                    parser_version,
                    chunk_count: chunks.len() as u32,
                    error_message: None,
                    last_modified: now_ms(),
                    indexed_at: now_ms(),
                    file_hash: new_hash,
                    last_retry: None,
                })?;
                self.stats.invalidate();
                self.counters.done.fetch_add(1, Ordering::SeqCst);
                let _ = self.events.send(QueueEvent::FileComplete { path }).await;
                Ok(())
            }
            ProcessOutcome::Failed(reason) => {
                self.file_status.upsert(&FileStatus {
                    path: path.clone(),
                    status: FileState::Failed,
                    parser_version,
                    chunk_count: 0,
                    error_message: Some(reason.clone()),
                    last_modified: now_ms(),
                    indexed_at: 0,
                    file_hash: new_hash,
                    last_retry: Some(now_ms()),
                })?;
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                let _ = self.events.send(QueueEvent::FileFailed { path, error: reason }).await;
                Ok(())
            }
            ProcessOutcome::Canceled => {
                let _ = self.events.send(QueueEvent::FileCanceled { path }).await;
                Ok(())
            }
        }
    }

    /// Request cancellation of in-flight processing for `path`. Drains the
    /// current in-flight batch, then discards any remaining batches; the
    /// file is left in its prior [`FileStatus`] with no chunks committed.
    pub fn cancel(&self, path: &Path) {
        if let Some(token) = self.cancellations.get(path) {
            token.cancel();
        }
    }

    /// Suspend dispatch of new batches. Already in-flight batches finish.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume dispatch after [`EmbeddingQueue::pause`].
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    /// Snapshot of the counters backing `index.progress()`. `initialized`
    /// and the overall lifecycle stage are the caller's (pipeline's)
    /// responsibility to fill in.
    pub fn progress_snapshot(&self) -> ProgressState {
        ProgressState {
            queued: self.counters.queued.load(Ordering::SeqCst),
            processing: self.counters.processing.load(Ordering::SeqCst),
            done: self.counters.done.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            initialized: false,
        }
    }

    async fn process_file(&self, path: &Path, chunks: Vec<Chunk>, token: &CancellationToken) -> ProcessOutcome {
        let total = chunks.len();
        let batches = pack_batches(chunks, self.config.batch_size, self.config.max_tokens_per_batch);

        let mut committed = Vec::with_capacity(total);
        let mut processed = 0usize;

        for batch in batches {
            if token.is_cancelled() {
                return ProcessOutcome::Canceled;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = tokio::select! {
                result = self.embedder.embed_with_retry(&texts, false) => result,
                () = token.cancelled() => return ProcessOutcome::Canceled,
            };

            match vectors {
                Ok(vectors) => {
                    for (mut chunk, vector) in batch.into_iter().zip(vectors) {
                        chunk.vector = vector;
                        committed.push(chunk);
                    }
                    processed = committed.len();
                    let _ = self
                        .events
                        .send(QueueEvent::Progress { path: path.to_path_buf(), processed_chunks: processed, total_chunks: total })
                        .await;

                    if self.embedder.should_restart().await {
                        info!(path = %path.display(), "embedder restart threshold reached; restarting before next batch");
                        if let Err(e) = self.embedder.restart().await {
                            warn!(error = %e, "embedder restart failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "batch embedding failed after retries");
                    return ProcessOutcome::Failed(e.to_string());
                }
            }
        }

        if let Err(e) = self.vector_table.reindex_path(path, committed) {
            return ProcessOutcome::Failed(e.to_string());
        }

        info!(path = %path.display(), chunks = total, "file committed to vector table");
        ProcessOutcome::Committed
    }
}

enum ProcessOutcome {
    Committed,
    Failed(String),
    Canceled,
}

/// Estimated token count: `ceil(text.len() / 4)` characters (spec.md §4.9).
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn pack_batches(chunks: Vec<Chunk>, batch_size: usize, max_tokens_per_batch: usize) -> Vec<Vec<Chunk>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens = 0usize;

    for chunk in chunks {
        let tokens = estimate_tokens(&chunk.text);
        let would_overflow = !current.is_empty()
            && (current.len() >= batch_size || current_tokens + tokens > max_tokens_per_batch);
        if would_overflow {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(chunk);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: "id".to_string(),
            path: PathBuf::from("/doc.txt"),
            mtime: 0,
            page: 0,
            offset: 0,
            text: text.to_string(),
            vector: Vec::new(),
            r#type: "txt".to_string(),
            title: "doc".to_string(),
        }
    }

    #[test]
    fn pack_batches_respects_batch_size() {
        let chunks = (0..10).map(|_| chunk("short")).collect::<Vec<_>>();
        let batches = pack_batches(chunks, 4, 100_000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[2].len(), 2);
    }

    #[test]
    fn pack_batches_respects_token_ceiling() {
        let big_text = "x".repeat(4000); // ~1000 estimated tokens
        let chunks = vec![chunk(&big_text), chunk(&big_text), chunk(&big_text)];
        let batches = pack_batches(chunks, 32, 1500);
        assert!(batches.len() >= 2);
        for batch in &batches {
            let total: usize = batch.iter().map(|c| estimate_tokens(&c.text)).sum();
            assert!(total <= 1500 || batch.len() == 1);
        }
    }

    #[test]
    fn single_oversized_chunk_forms_its_own_batch() {
        let huge = "x".repeat(40_000);
        let chunks = vec![chunk(&huge)];
        let batches = pack_batches(chunks, 32, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(""), 0);
    }

    fn test_queue(dir: &std::path::Path) -> EmbeddingQueue {
        let vector_table = Arc::new(VectorTable::open(&dir.join("vectors.bin"), 2).expect("open vector table"));
        let file_status = Arc::new(FileStatusRepository::open(&dir.join("status.db")).expect("open file status"));
        let embedder = Arc::new(EmbedderSupervisor::new(crate::config::EmbedderConfig::default()));
        let stats = Arc::new(StatsCache::new());
        let (tx, _rx) = mpsc::channel(16);
        EmbeddingQueue::new(QueueConfig::default(), vector_table, file_status, embedder, stats, tx)
    }

    #[tokio::test]
    async fn pause_blocks_submit_until_resumed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Arc::new(test_queue(dir.path()));
        queue.pause();
        assert!(queue.progress_snapshot().paused);

        let submitted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let queue2 = queue.clone();
        let submitted2 = submitted.clone();
        let handle = tokio::spawn(async move {
            let _ = queue2
                .submit(PathBuf::from("/doc.txt"), vec![chunk("hi")], "hash".into(), 1)
                .await;
            submitted2.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!submitted.load(Ordering::SeqCst));

        queue.resume();
        handle.await.expect("task");
        assert!(submitted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn progress_snapshot_counts_completed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = test_queue(dir.path());
        queue.submit(PathBuf::from("/doc.txt"), vec![chunk("hi")], "hash".into(), 1).await.ok();
        let snapshot = queue.progress_snapshot();
        assert_eq!(snapshot.queued, 0);
        assert_eq!(snapshot.processing, 0);
    }
}
