//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`SEMANTICA_*`)
//! 2. `./config.json` under the user-data directory
//! 3. Compiled-in defaults
//!
//! The persisted format is JSON, not TOML: `config.json`'s
//! `watchedFolders`/`settings` shape is the one external contract callers
//! and the UI depend on (see spec.md §6), so it is kept byte-for-byte
//! compatible rather than translated into a richer internal format.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level configuration for semantica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Folders currently designated for watching and indexing.
    #[serde(default)]
    pub watched_folders: Vec<PathBuf>,

    /// User-facing tunables from spec.md §6.
    #[serde(default)]
    pub settings: Settings,

    /// Embedding queue tunables (spec.md §4.9).
    #[serde(default)]
    pub queue: QueueConfig,

    /// Embedder supervisor tunables (spec.md §4.8).
    #[serde(default)]
    pub embedder: EmbedderConfig,

    /// Per-stage timeouts (spec.md §4.11).
    #[serde(default)]
    pub stage_timeouts_ms: StageTimeouts,

    /// Folder watcher tunables (spec.md §4.10).
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Chunker tunables (spec.md §4.3).
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

/// The externally documented `settings` object of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Glob patterns excluded from folder enumeration and watching.
    #[serde(default = "Settings::default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Batch size for embedding requests. Initializes `queue.batch_size`
    /// unless the latter is set explicitly.
    #[serde(default = "Settings::default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    /// Throughput-shaping knob. See DESIGN.md for the chosen mapping
    /// (pipeline worker pool size).
    #[serde(default)]
    pub cpu_throttle: CpuThrottle,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exclude_patterns: Self::default_exclude_patterns(),
            embedding_batch_size: Self::default_embedding_batch_size(),
            cpu_throttle: CpuThrottle::default(),
        }
    }
}

impl Settings {
    fn default_exclude_patterns() -> Vec<String> {
        vec![
            "node_modules".into(),
            ".git".into(),
            "*.tmp".into(),
            ".DS_Store".into(),
        ]
    }

    fn default_embedding_batch_size() -> usize {
        32
    }
}

/// `cpuThrottle` setting; see spec.md §9 Open Question 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuThrottle {
    /// Single pipeline worker.
    Low,
    /// Half the available cores, minimum 2.
    #[default]
    Medium,
    /// All available cores, minimum 2.
    High,
}

impl CpuThrottle {
    /// Resolve to a concrete pipeline worker pool size.
    pub fn worker_pool_size(self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2);
        match self {
            Self::Low => 1,
            Self::Medium => (cores / 2).max(2),
            Self::High => cores.max(2),
        }
    }
}

/// Embedding queue tunables (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Maximum total chunks resident in the queue before backpressure engages.
    #[serde(default = "QueueConfig::default_max_queue_size")]
    pub max_queue_size: usize,
    /// Target chunk count per embedding batch.
    #[serde(default = "QueueConfig::default_batch_size")]
    pub batch_size: usize,
    /// Token-estimate ceiling per batch.
    #[serde(default = "QueueConfig::default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,
    /// Depth at which producers may resume after backpressure.
    #[serde(default = "QueueConfig::default_backpressure_threshold")]
    pub backpressure_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: Self::default_max_queue_size(),
            batch_size: Self::default_batch_size(),
            max_tokens_per_batch: Self::default_max_tokens_per_batch(),
            backpressure_threshold: Self::default_backpressure_threshold(),
        }
    }
}

impl QueueConfig {
    fn default_max_queue_size() -> usize {
        2000
    }
    fn default_batch_size() -> usize {
        32
    }
    fn default_max_tokens_per_batch() -> usize {
        7000
    }
    fn default_backpressure_threshold() -> usize {
        1000
    }
}

/// Embedder supervisor tunables (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedderConfig {
    /// Restart threshold: files processed since last spawn.
    #[serde(default = "EmbedderConfig::default_max_files")]
    pub max_files: u64,
    /// Restart threshold: resident set size in megabytes.
    #[serde(default = "EmbedderConfig::default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Restart threshold: external (non-RSS) heap in megabytes.
    #[serde(default = "EmbedderConfig::default_max_external_heap_mb")]
    pub max_external_heap_mb: u64,
    /// Command line used to spawn the embedder child process.
    #[serde(default = "EmbedderConfig::default_command_line")]
    pub command_line: Vec<String>,
    /// Declared embedding dimension of the active model. Fixed at vector
    /// table creation time (spec.md §9 Open Question 3).
    #[serde(default = "EmbedderConfig::default_dimension")]
    pub dimension: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            max_files: Self::default_max_files(),
            max_memory_mb: Self::default_max_memory_mb(),
            max_external_heap_mb: Self::default_max_external_heap_mb(),
            command_line: Self::default_command_line(),
            dimension: Self::default_dimension(),
        }
    }
}

impl EmbedderConfig {
    fn default_max_files() -> u64 {
        500
    }
    fn default_max_memory_mb() -> u64 {
        1500
    }
    fn default_max_external_heap_mb() -> u64 {
        300
    }
    fn default_command_line() -> Vec<String> {
        vec!["semantica-embedder".into()]
    }
    fn default_dimension() -> u32 {
        384
    }
}

/// Per-stage startup timeouts, milliseconds (spec.md §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimeouts {
    /// Timeout for spawning the embedder child process.
    pub worker_spawn: u64,
    /// Timeout for opening/creating the file status repository.
    pub db_init: u64,
    /// Timeout for repopulating the in-memory file-hash map.
    pub db_load: u64,
    /// Timeout for checking whether the embedding model is present.
    pub model_check: u64,
    /// Timeout for downloading the embedding model, if absent.
    pub model_download: u64,
    /// Timeout for the embedder's ready handshake.
    pub embedder_init: u64,
    /// Timeout for the initial folder enumeration.
    pub folder_scan: u64,
    /// Timeout for the final ready handshake.
    pub ready: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            worker_spawn: 10_000,
            db_init: 10_000,
            db_load: 30_000,
            model_check: 10_000,
            model_download: 300_000,
            embedder_init: 30_000,
            folder_scan: 30_000,
            ready: 5_000,
        }
    }
}

/// Folder watcher tunables (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Minimum interval between processed events for the same path.
    #[serde(default = "WatcherConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl WatcherConfig {
    fn default_debounce_ms() -> u64 {
        200
    }
}

/// Chunker tunables (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkerConfig {
    /// Target chunk size in words.
    #[serde(default = "ChunkerConfig::default_target_tokens")]
    pub target_tokens: usize,
    /// Overlap between adjacent chunks, in words.
    #[serde(default = "ChunkerConfig::default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Hard per-chunk token ceiling: no chunk may exceed
    /// `queue.maxTokensPerBatch / queue.batchSize` tokens (spec.md §4.3).
    /// Not itself a `config.json` field; recomputed from the queue
    /// section in [`Config::reconcile`] so it always tracks the current
    /// batch shape.
    #[serde(default = "ChunkerConfig::default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: Self::default_target_tokens(),
            overlap_tokens: Self::default_overlap_tokens(),
            max_chunk_tokens: Self::default_max_chunk_tokens(),
        }
    }
}

impl ChunkerConfig {
    fn default_target_tokens() -> usize {
        200
    }
    fn default_overlap_tokens() -> usize {
        40
    }
    fn default_max_chunk_tokens() -> usize {
        QueueConfig::default_max_tokens_per_batch() / QueueConfig::default_batch_size()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watched_folders: Vec::new(),
            settings: Settings::default(),
            queue: QueueConfig::default(),
            embedder: EmbedderConfig::default(),
            stage_timeouts_ms: StageTimeouts::default(),
            watcher: WatcherConfig::default(),
            chunker: ChunkerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `./config.json` under `data_dir`, applying
    /// compiled-in defaults for anything absent and environment overrides
    /// last.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let config_path = data_dir.join("config.json");
        if config_path.exists() {
            config.merge_from_file(&config_path)?;
        }

        config.apply_env_overrides();
        config.reconcile();
        Ok(config)
    }

    /// Persist this configuration to `./config.json` under `data_dir`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join("config.json"), content)?;
        Ok(())
    }

    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let parsed: Config = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("invalid config.json at {}: {e}", path.display()),
        })?;
        *self = parsed;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dim) = std::env::var("SEMANTICA_MODEL_DIM") {
            if let Ok(dim) = dim.parse() {
                self.embedder.dimension = dim;
            }
        }
    }

    /// `settings.embeddingBatchSize` seeds `queue.batchSize` when the queue
    /// section was not itself present in the loaded file.
    fn reconcile(&mut self) {
        if self.queue.batch_size == QueueConfig::default_batch_size() {
            self.queue.batch_size = self.settings.embedding_batch_size;
        }
        self.chunker.max_chunk_tokens = self.queue.max_tokens_per_batch / self.queue.batch_size.max(1);
    }

    /// Resolve the base user-data directory (platform default, or
    /// `SEMANTICA_DATA_DIR` override).
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("SEMANTICA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("semantica")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_queue_size, 2000);
        assert_eq!(config.queue.batch_size, 32);
        assert_eq!(config.embedder.max_files, 500);
        assert_eq!(config.embedder.max_memory_mb, 1500);
        assert_eq!(config.watcher.debounce_ms, 200);
        assert_eq!(config.chunker.target_tokens, 200);
        assert_eq!(config.chunker.overlap_tokens, 40);
        assert_eq!(config.chunker.max_chunk_tokens, 218);
    }

    #[test]
    fn reconcile_recomputes_chunk_token_ceiling_from_queue_shape() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"queue": {"maxTokensPerBatch": 1000, "batchSize": 10}}"#,
        )
        .expect("write config.json");
        let config = Config::load(dir.path()).expect("load config");
        assert_eq!(config.chunker.max_chunk_tokens, 100);
    }

    #[test]
    fn cpu_throttle_maps_to_worker_pool_size() {
        assert_eq!(CpuThrottle::Low.worker_pool_size(), 1);
        assert!(CpuThrottle::Medium.worker_pool_size() >= 2);
        assert!(CpuThrottle::High.worker_pool_size() >= 2);
    }

    #[test]
    fn load_absent_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = Config::load(dir.path()).expect("load config");
        assert!(config.watched_folders.is_empty());
    }

    #[test]
    fn load_merges_config_json() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"watchedFolders": ["/docs"], "settings": {"embeddingBatchSize": 64}}"#,
        )
        .expect("write config.json");
        let config = Config::load(dir.path()).expect("load config");
        assert_eq!(config.watched_folders, vec![PathBuf::from("/docs")]);
        assert_eq!(config.queue.batch_size, 64);
    }
}
