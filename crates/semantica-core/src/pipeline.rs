//! Pipeline orchestrator.
//!
//! Wires every subsystem into the coherent indexing + query engine this
//! crate exposes as its public API.
//!
//! ## Architecture
//!
//! ```text
//! watcher --> pipeline channel --> process_event() --> decision --> parser --> chunker
//!                                                                                 |
//!                                                                                 v
//!                                                                       embedding queue --> embedder --> vector table
//!                                                                                 |                           |
//!                                                                                 v                           v
//!                                                                          file status repo            stats cache invalidation
//! ```
//!
//! Query calls go straight from the Query Engine to the Vector Table,
//! independent of the ingestion path above.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::decision;
use crate::embedder::EmbedderSupervisor;
use crate::error::{Error, Result};
use crate::file_status::FileStatusRepository;
use crate::hash;
use crate::lifecycle::LifecycleStateMachine;
use crate::parser::{self, ParserRegistry};
use crate::query::QueryEngine;
use crate::queue::{EmbeddingQueue, QueueEvent};
use crate::stats_cache::StatsCache;
use crate::types::{now_ms, DatabaseStats, FileState, FolderStats, Hit, ModelCheck, PipelineEvent, ProgressState, StageProgress};
use crate::vector::VectorTable;
use crate::watcher::FolderWatcher;
use crate::{chunker, types::Stage};

/// Channels a caller needs to observe engine activity; split out of
/// [`Engine`] itself so `Engine`'s methods can take `&self` and run
/// concurrently with the background ingestion task.
pub struct EngineChannels {
    /// Startup stage progress (spec.md §4.13).
    pub stage_progress: mpsc::Receiver<StageProgress>,
    /// Per-file indexing progress/outcome events (spec.md §4.9).
    pub queue_events: mpsc::Receiver<QueueEvent>,
}

/// The main semantica engine.
///
/// Owns every subsystem and coordinates their lifecycle. Construct with
/// [`Engine::new`], drive the startup sequence with [`Engine::start`],
/// then call [`Engine::query`] / [`Engine::stats`] as needed.
pub struct Engine {
    config: Config,
    registry: ParserRegistry,
    lifecycle: Arc<LifecycleStateMachine>,
    file_status: Arc<FileStatusRepository>,
    vector_table: Arc<VectorTable>,
    embedder: Arc<EmbedderSupervisor>,
    stats: Arc<StatsCache>,
    queue: Arc<EmbeddingQueue>,
    /// Swapped out wholesale by `index.watchStart` to pick up a new folder
    /// set; see [`Engine::watch_start`].
    watcher: SyncMutex<Arc<FolderWatcher>>,
    query_engine: QueryEngine,
    /// In-memory mirror of `FileStatus::file_hash`, repopulated during
    /// the `LoadingFiles` stage so the decision engine's hot path avoids
    /// a SQLite round trip per watcher event (spec.md §4.11).
    file_hashes: Arc<DashMap<PathBuf, String>>,
    pipeline_tx: mpsc::Sender<PipelineEvent>,
    pipeline_rx: SyncMutex<Option<Arc<tokio::sync::Mutex<mpsc::Receiver<PipelineEvent>>>>>,
}

impl Engine {
    /// Construct every subsystem. Does not start watching or accept
    /// queries yet; call [`Engine::start`] to run the startup sequence.
    pub fn new(config: Config) -> Result<(Self, EngineChannels)> {
        let data_dir = Config::data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let registry = ParserRegistry::new();
        let file_status = Arc::new(FileStatusRepository::open(&data_dir.join("file_status.db"))?);
        let vector_table = Arc::new(VectorTable::open(
            &data_dir.join("vectors").join("vectors.bin"),
            config.embedder.dimension as usize,
        )?);
        let embedder = Arc::new(EmbedderSupervisor::new(config.embedder.clone()));
        let stats = Arc::new(StatsCache::new());

        let (progress_tx, progress_rx) = mpsc::channel(64);
        let lifecycle = Arc::new(LifecycleStateMachine::new(progress_tx, config.stage_timeouts_ms.clone()));

        let (queue_events_tx, queue_events_rx) = mpsc::channel(256);
        let queue = Arc::new(EmbeddingQueue::new(
            config.queue.clone(),
            vector_table.clone(),
            file_status.clone(),
            embedder.clone(),
            stats.clone(),
            queue_events_tx,
        ));

        let extensions = registry.extensions();
        let watcher = Arc::new(FolderWatcher::new(
            config.watched_folders.clone(),
            &extensions,
            &config.settings.exclude_patterns,
            config.watcher.debounce_ms,
        )?);

        let query_engine = QueryEngine::new(embedder.clone(), vector_table.clone());

        let (pipeline_tx, pipeline_rx) = mpsc::channel(1024);

        let engine = Self {
            config,
            registry,
            lifecycle,
            file_status,
            vector_table,
            embedder,
            stats,
            queue,
            watcher: SyncMutex::new(watcher),
            query_engine,
            file_hashes: Arc::new(DashMap::new()),
            pipeline_tx,
            pipeline_rx: SyncMutex::new(Some(Arc::new(tokio::sync::Mutex::new(pipeline_rx)))),
        };

        Ok((engine, EngineChannels { stage_progress: progress_rx, queue_events: queue_events_rx }))
    }

    /// Run the ordered startup sequence (spec.md §4.11), ending with the
    /// background ingestion task spawned and the watcher live.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let embedder = self.embedder.clone();
        self.lifecycle.run_stage(Stage::StartingSidecar, move || async move { embedder.initialize().await }).await?;
        self.lifecycle.run_stage(Stage::SidecarReady, || async { Ok(()) }).await?;

        let file_status = self.file_status.clone();
        let vector_table = self.vector_table.clone();
        self.lifecycle
            .run_stage(Stage::InitializingDb, move || async move {
                file_status.check_integrity()?;
                vector_table.migrate_if_needed()
            })
            .await?;
        self.lifecycle.run_stage(Stage::DbReady, || async { Ok(()) }).await?;

        let file_status = self.file_status.clone();
        let file_hashes = self.file_hashes.clone();
        let lifecycle_for_progress = self.lifecycle.clone();
        self.lifecycle
            .run_stage(Stage::LoadingFiles, move || async move {
                let records = file_status.query_all()?;
                for (i, record) in records.iter().enumerate() {
                    file_hashes.insert(record.path.clone(), record.file_hash.clone());
                    if (i + 1) % 100 == 0 {
                        lifecycle_for_progress.report_progress(None, None).await;
                    }
                }
                Ok(())
            })
            .await?;

        let watcher = self.watcher.lock().clone();
        let tx = self.pipeline_tx.clone();
        self.lifecycle
            .run_stage(Stage::ScanningFolders, move || async move {
                let scan_watcher = watcher.clone();
                let tx_for_scan = tx.clone();
                let count = tokio::task::spawn_blocking(move || scan_watcher.full_scan(&tx_for_scan))
                    .await
                    .map_err(|e| Error::Config { message: format!("scan task panicked: {e}") })??;
                info!(files = count, "initial folder scan complete");
                watcher.watch(tx)?;
                Ok(())
            })
            .await?;

        self.lifecycle.run_stage(Stage::Ready, || async { Ok(()) }).await?;

        let rx = self.pipeline_rx.lock().take();
        if let Some(rx) = rx {
            // A small bounded pool of workers share one event channel
            // (spec.md §5: "a small bounded pool, min 2"), sized by the
            // configured `cpuThrottle` (spec.md §9 Open Question 2).
            let worker_count = self.config.settings.cpu_throttle.worker_pool_size();
            for _ in 0..worker_count {
                let engine = self.clone();
                let rx = rx.clone();
                tokio::spawn(async move { engine.run_event_loop(rx).await });
            }
        }

        Ok(())
    }

    async fn run_event_loop(self: Arc<Self>, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PipelineEvent>>>) {
        loop {
            let event = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(event) = event else { break };
            match event {
                PipelineEvent::FileChanged { path } => {
                    if let Err(e) = self.process_file(&path).await {
                        warn!(path = %path.display(), error = %e, "failed to process file");
                    }
                }
                PipelineEvent::FileDeleted { path } => {
                    if let Err(e) = self.remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "failed to remove file from index");
                    }
                }
                PipelineEvent::FullScan => {}
                PipelineEvent::Shutdown => break,
            }
        }
    }

    async fn process_file(&self, path: &Path) -> Result<()> {
        let metadata_path = path.to_path_buf();
        let metadata = tokio::task::spawn_blocking(move || std::fs::metadata(&metadata_path))
            .await
            .map_err(|e| Error::Config { message: format!("metadata task panicked: {e}") })??;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let current_hash = hash::file_hash(path, metadata.len(), mtime_ms);

        let record = self.file_status.get(path)?;
        if !decision::should_reindex(&self.registry, path, record.as_ref(), &current_hash, now_ms()) {
            return Ok(());
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Ok(());
        };
        let Some(parser_version) = self.registry.version(ext) else {
            return Ok(());
        };

        let read_path = path.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(&read_path))
            .await
            .map_err(|e| Error::Config { message: format!("read task panicked: {e}") })??;
        let segments = match parser::parse_file(&self.registry, path, &bytes)? {
            Some(segments) => segments,
            None => return Ok(()),
        };

        let chunks = chunker::chunk_document(path, mtime_ms, &segments, &self.config.chunker);
        self.queue.submit(path.to_path_buf(), chunks, current_hash.clone(), parser_version).await?;
        self.file_hashes.insert(path.to_path_buf(), current_hash);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.vector_table.delete_where_path(path)?;
        self.file_status.delete(path)?;
        self.file_hashes.remove(path);
        self.stats.invalidate();
        Ok(())
    }

    /// Run a search query, gated on the lifecycle state machine having
    /// reached `Ready` (spec.md §4.11).
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Hit>> {
        self.lifecycle.gate("search")?;
        self.query_engine.query(text, k).await
    }

    /// Corpus-wide statistics, deduplicated via the Stats Cache.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        self.lifecycle.gate("db.stats")?;
        let file_status = self.file_status.clone();
        let vector_table = self.vector_table.clone();
        let watched_folders = self.config.watched_folders.clone();
        let dimension = self.config.embedder.dimension;
        self.stats
            .get(move || async move { compute_stats(&file_status, &vector_table, &watched_folders, dimension) })
            .await
    }

    /// Request cancellation of in-flight processing for `path`.
    pub fn cancel(&self, path: &Path) {
        self.queue.cancel(path);
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> Stage {
        self.lifecycle.stage()
    }

    /// Gracefully shut down the embedder child and stop watching.
    pub async fn shutdown(&self) -> Result<()> {
        self.watcher.lock().stop();
        self.embedder.shutdown(std::time::Duration::from_secs(5)).await?;
        info!("engine shut down");
        Ok(())
    }

    /// Replace the watched folder set and start watching it immediately
    /// (`index.watchStart`, spec.md §6). Runs an initial scan of the new
    /// roots before switching the live watcher over.
    pub async fn watch_start(&self, folders: Vec<PathBuf>) -> Result<usize> {
        self.lifecycle.gate("index.watchStart")?;

        let extensions = self.registry.extensions();
        let new_watcher = Arc::new(FolderWatcher::new(
            folders.clone(),
            &extensions,
            &self.config.settings.exclude_patterns,
            self.config.watcher.debounce_ms,
        )?);

        let tx = self.pipeline_tx.clone();
        let scan_watcher = new_watcher.clone();
        let tx_for_scan = tx.clone();
        let count = tokio::task::spawn_blocking(move || scan_watcher.full_scan(&tx_for_scan))
            .await
            .map_err(|e| Error::Config { message: format!("scan task panicked: {e}") })??;
        new_watcher.watch(tx)?;

        let old = {
            let mut guard = self.watcher.lock();
            std::mem::replace(&mut *guard, new_watcher)
        };
        old.stop();
        Ok(count)
    }

    /// Stop watching every folder (`index.watchStop`, spec.md §6).
    pub fn watch_stop(&self) -> Result<()> {
        self.lifecycle.gate("index.watchStop")?;
        self.watcher.lock().stop();
        Ok(())
    }

    /// Suspend dispatch of queued embedding work (`index.pause`).
    pub fn pause(&self) -> Result<()> {
        self.lifecycle.gate("index.pause")?;
        self.queue.pause();
        Ok(())
    }

    /// Resume dispatch after [`Engine::pause`] (`index.resume`).
    pub fn resume(&self) -> Result<()> {
        self.lifecycle.gate("index.resume")?;
        self.queue.resume();
        Ok(())
    }

    /// Snapshot of indexing progress (`index.progress`, spec.md §6).
    pub fn progress(&self) -> Result<ProgressState> {
        self.lifecycle.gate("index.progress")?;
        let mut snapshot = self.queue.progress_snapshot();
        snapshot.initialized = self.lifecycle.is_ready();
        Ok(snapshot)
    }

    /// Drop every indexed file and embedded chunk (`db.clear`, spec.md §6).
    pub async fn clear(&self) -> Result<()> {
        self.lifecycle.gate("db.clear")?;
        self.vector_table.clear()?;
        self.file_status.clear()?;
        self.file_hashes.clear();
        self.stats.invalidate();
        Ok(())
    }

    /// Whether the embedder's model is ready, and its declared dimension
    /// (`model.check`, spec.md §6).
    pub async fn model_check(&self) -> Result<ModelCheck> {
        self.lifecycle.gate("model.check")?;
        Ok(ModelCheck { exists: self.embedder.is_available().await, dim: self.config.embedder.dimension })
    }
}

fn compute_stats(
    file_status: &FileStatusRepository,
    vector_table: &VectorTable,
    watched_folders: &[PathBuf],
    dimension: u32,
) -> std::result::Result<DatabaseStats, String> {
    let records = file_status.query_all().map_err(|e| e.to_string())?;
    let indexed_files = records.iter().filter(|r| r.status == FileState::Indexed).count() as u64;
    let total_chunks = vector_table.count() as u64;

    let mut folder_stats: Vec<(String, FolderStats)> =
        watched_folders.iter().map(|f| (f.display().to_string(), FolderStats::default())).collect();

    for record in &records {
        for (folder, entry) in folder_stats.iter_mut() {
            if record.path.starts_with(folder) {
                entry.total += 1;
                if record.status == FileState::Indexed {
                    entry.indexed += 1;
                }
            }
        }
    }

    Ok(DatabaseStats { indexed_files, total_chunks, folder_stats, model_dim: dimension })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_engine_starts_uninitialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("SEMANTICA_DATA_DIR", dir.path());
        let config = Config::default();
        let (engine, _channels) = Engine::new(config).expect("construct engine");
        assert_eq!(engine.stage(), Stage::Uninitialized);
        std::env::remove_var("SEMANTICA_DATA_DIR");
    }

    #[tokio::test]
    async fn model_check_is_answered_before_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("SEMANTICA_DATA_DIR", dir.path());
        let config = Config::default();
        let (engine, _channels) = Engine::new(config).expect("construct engine");
        let check = engine.model_check().await.expect("always-allowed before ready");
        assert!(!check.exists);
        assert_eq!(check.dim, 384);
        std::env::remove_var("SEMANTICA_DATA_DIR");
    }

    #[test]
    fn indexing_controls_are_gated_before_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("SEMANTICA_DATA_DIR", dir.path());
        let config = Config::default();
        let (engine, _channels) = Engine::new(config).expect("construct engine");
        assert!(matches!(engine.pause(), Err(Error::NotReady)));
        assert!(matches!(engine.progress(), Err(Error::NotReady)));
        std::env::remove_var("SEMANTICA_DATA_DIR");
    }
}
