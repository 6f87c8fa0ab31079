//! Embedder Supervisor (C8).
//!
//! Owns an out-of-process embedding model child, isolated from the main
//! process for crash containment and memory-ceiling enforcement
//! (spec.md §4.8). The child is spawned from `embedder.commandLine` and
//! speaks the newline-delimited JSON protocol in [`protocol`]; requests
//! are tagged with a correlation id so replies can be matched against a
//! pending-request map even when the supervisor interleaves batches.
//!
//! Graceful shutdown is requested over the same channel (`{"method":
//! "shutdown"}`) rather than a real `SIGTERM`: the workspace denies
//! `unsafe_code`, and `tokio::process` exposes no safe cross-platform
//! signal other than a hard kill, so the protocol-level request stands
//! in for the signal and [`Child::start_kill`] stands in for `SIGKILL`.

pub mod protocol;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::config::{Config, EmbedderConfig};
use crate::error::{Error, Result};
use protocol::{ChildMessage, EmbedRequest, ShutdownRequest};

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const EMBED_TIMEOUT: Duration = Duration::from_secs(60);
const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);
const HARD_KILL_GRACE: Duration = Duration::from_millis(100);
const MAX_RETRIES: u32 = 3;

type EmbedReply = std::result::Result<Vec<Vec<f32>>, String>;

struct PendingRequests(SyncMutex<HashMap<Uuid, oneshot::Sender<EmbedReply>>>);

impl PendingRequests {
    fn new() -> Arc<Self> {
        Arc::new(Self(SyncMutex::new(HashMap::new())))
    }

    fn insert(&self, id: Uuid, tx: oneshot::Sender<EmbedReply>) {
        self.0.lock().insert(id, tx);
    }

    fn drain_with_error(&self, message: &str) {
        for (_, tx) in self.0.lock().drain() {
            let _ = tx.send(Err(message.to_string()));
        }
    }
}

struct ChildProcess {
    child: Child,
    stdin: ChildStdin,
    pending: Arc<PendingRequests>,
    reader_task: tokio::task::JoinHandle<()>,
    files_since_spawn: u64,
    external_heap_mb: Arc<SyncMutex<Option<u64>>>,
}

/// Supervises the embedding model child process: spawn, health/restart
/// policy, and correlation-id-routed request/response IPC.
pub struct EmbedderSupervisor {
    config: EmbedderConfig,
    child: AsyncMutex<Option<ChildProcess>>,
    inflight: AtomicU64,
}

impl EmbedderSupervisor {
    /// Build a supervisor for `config`. No child is spawned until
    /// [`EmbedderSupervisor::initialize`] is called.
    pub fn new(config: EmbedderConfig) -> Self {
        Self { config, child: AsyncMutex::new(None), inflight: AtomicU64::new(0) }
    }

    /// Declared embedding dimension of the active model.
    pub fn dimension(&self) -> usize {
        self.config.dimension as usize
    }

    /// Whether a child is currently spawned and past its ready handshake.
    pub async fn is_available(&self) -> bool {
        self.child.lock().await.is_some()
    }

    /// Cold-start the embedder child and await its "ready" handshake,
    /// with a 30 s timeout (spec.md §4.8).
    pub async fn initialize(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.spawn_and_await_ready().await?);
        Ok(())
    }

    async fn spawn_and_await_ready(&self) -> Result<ChildProcess> {
        let (program, args) = self.config.command_line.split_first().ok_or_else(|| Error::Config {
            message: "embedder.commandLine must name at least a program".into(),
        })?;

        let model_cache_dir = Config::data_dir().join("model_cache");
        std::fs::create_dir_all(&model_cache_dir)
            .map_err(|e| Error::Config { message: format!("failed to create model cache dir: {e}") })?;

        let mut command = Command::new(program);
        command
            .args(args)
            // Forces pure-CPU execution, bypassing any host-imposed GPU sandbox (spec.md §6).
            .env("SEMANTICA_FORCE_CPU", "1")
            // Cache directory pointing at the model cache (spec.md §6).
            .env("SEMANTICA_MODEL_CACHE_DIR", &model_cache_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Config { message: format!("failed to spawn embedder child: {e}") })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Config { message: "embedder child has no stdin".into() })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Config { message: "embedder child has no stdout".into() })?;

        let pending = PendingRequests::new();
        let external_heap_mb = Arc::new(SyncMutex::new(None));
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader_task = spawn_reader(BufReader::new(stdout), pending.clone(), external_heap_mb.clone(), ready_tx);

        match timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                reader_task.abort();
                let _ = child.start_kill();
                return Err(Error::EmbedProcessExited);
            }
            Err(_) => {
                reader_task.abort();
                let _ = child.start_kill();
                return Err(Error::StageTimeout { stage: crate::types::Stage::StartingSidecar });
            }
        }

        Ok(ChildProcess {
            child,
            stdin,
            pending,
            reader_task,
            files_since_spawn: 0,
            external_heap_mb,
        })
    }

    /// Embed `texts`, returning vectors in input order. `is_query`
    /// distinguishes query-mode embeddings from indexing batches; the
    /// child may apply a different pooling/prefix strategy for each.
    pub async fn embed(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let result = self.embed_once(texts, is_query).await;
        self.inflight.fetch_sub(1, Ordering::SeqCst);

        if result.is_ok() {
            if let Some(child) = self.child.lock().await.as_mut() {
                child.files_since_spawn += 1;
            }
        }
        result
    }

    async fn embed_once(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.child.lock().await;
            let child = guard.as_mut().ok_or(Error::EmbedProcessExited)?;
            child.pending.insert(id, tx);

            let request = EmbedRequest { id, method: "embed", texts, is_query };
            let mut line = serde_json::to_vec(&request)?;
            line.push(b'\n');
            if let Err(e) = child.stdin.write_all(&line).await {
                child.pending.drain_with_error("embedder stdin closed");
                return Err(Error::Io(e));
            }
            if let Err(e) = child.stdin.flush().await {
                return Err(Error::Io(e));
            }
        }

        match timeout(EMBED_TIMEOUT, rx).await {
            Ok(Ok(Ok(vectors))) => Ok(vectors),
            Ok(Ok(Err(reason))) => Err(Error::EmbedBatchFailed { reason }),
            Ok(Err(_)) => Err(Error::EmbedProcessExited),
            Err(_) => Err(Error::EmbedTimeout),
        }
    }

    /// Embed with up to [`MAX_RETRIES`] retries and exponential backoff,
    /// restarting the child first if it died between attempts
    /// (spec.md §4.8).
    pub async fn embed_with_retry(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.embed(texts, is_query).await {
                Ok(vectors) => return Ok(vectors),
                Err(Error::EmbedProcessExited) if attempt < MAX_RETRIES => {
                    warn!(attempt, "embedder process exited mid-request; restarting before retry");
                    if let Err(e) = self.restart().await {
                        warn!(error = %e, "embedder restart failed");
                    }
                }
                Err(e @ (Error::EmbedTimeout | Error::EmbedBatchFailed { .. })) if attempt < MAX_RETRIES => {
                    warn!(attempt, error = %e, "embed attempt failed; retrying with backoff");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(Duration::from_secs(2u64.saturating_pow(attempt))).await;
            attempt += 1;
        }
    }

    /// True iff the child should be restarted: past `maxFiles`, past
    /// `maxMemoryMB` RSS, or past `maxExternalHeapMB`, and only when no
    /// request is in flight and at least one file has been processed
    /// since the last spawn (spec.md §4.8, Testable Property 7).
    pub async fn should_restart(&self) -> bool {
        if self.inflight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        let guard = self.child.lock().await;
        let Some(child) = guard.as_ref() else {
            return false;
        };
        if child.files_since_spawn == 0 {
            return false;
        }
        if child.files_since_spawn > self.config.max_files {
            return true;
        }
        if let Some(pid) = child.child.id() {
            let mut system = System::new();
            system.refresh_process(Pid::from_u32(pid));
            if let Some(process) = system.process(Pid::from_u32(pid)) {
                let rss_mb = process.memory() / (1024 * 1024);
                if rss_mb > self.config.max_memory_mb {
                    return true;
                }
            }
        }
        if let Some(heap_mb) = *child.external_heap_mb.lock() {
            if heap_mb > self.config.max_external_heap_mb {
                return true;
            }
        }
        false
    }

    /// Gracefully shut down the current child (if any) and spawn a
    /// fresh one, awaiting its ready handshake.
    pub async fn restart(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut old) = guard.take() {
            shut_down(&mut old).await;
        }
        *guard = Some(self.spawn_and_await_ready().await?);
        Ok(())
    }

    /// Drain in-flight work with a deadline, then terminate the child.
    /// Used on process shutdown (spec.md §5).
    pub async fn shutdown(&self, drain_deadline: Duration) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let deadline = Instant::now() + drain_deadline;
            while self.inflight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            shut_down(&mut child).await;
        }
        Ok(())
    }
}

async fn shut_down(child: &mut ChildProcess) {
    let mut line = serde_json::to_vec(&ShutdownRequest::new()).unwrap_or_default();
    line.push(b'\n');
    let _ = child.stdin.write_all(&line).await;
    let _ = child.stdin.flush().await;

    if timeout(GRACEFUL_SHUTDOWN_GRACE, child.child.wait()).await.is_err() {
        warn!("embedder child did not exit after graceful shutdown request; escalating");
        if timeout(HARD_KILL_GRACE, child.child.wait()).await.is_err() {
            let _ = child.child.start_kill();
            let _ = child.child.wait().await;
        }
    }

    child.reader_task.abort();
    child.pending.drain_with_error("embedder restarting");
}

fn spawn_reader(
    stdout: BufReader<tokio::process::ChildStdout>,
    pending: Arc<PendingRequests>,
    external_heap_mb: Arc<SyncMutex<Option<u64>>>,
    ready_tx: oneshot::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        let mut lines = stdout.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChildMessage>(&line) {
                        Ok(msg) => {
                            if let Some(heap_mb) = msg.external_heap_mb {
                                *external_heap_mb.lock() = Some(heap_mb);
                            }
                            if msg.ready {
                                if let Some(tx) = ready_tx.take() {
                                    let _ = tx.send(());
                                }
                                continue;
                            }
                            if let Some(id) = msg.id {
                                if let Some(tx) = pending.0.lock().remove(&id) {
                                    let reply = match msg.error {
                                        Some(e) => Err(e),
                                        None => Ok(msg.vectors.unwrap_or_default()),
                                    };
                                    let _ = tx.send(reply);
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, %line, "malformed embedder message, dropped"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "embedder stdout read error");
                    break;
                }
            }
        }
        pending.drain_with_error("embedder process exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmbedderConfig {
        EmbedderConfig {
            max_files: 500,
            max_memory_mb: 1500,
            max_external_heap_mb: 300,
            command_line: vec!["semantica-embedder".into()],
            dimension: 384,
        }
    }

    #[test]
    fn dimension_reflects_configured_value() {
        let supervisor = EmbedderSupervisor::new(config());
        assert_eq!(supervisor.dimension(), 384);
    }

    #[tokio::test]
    async fn not_available_before_initialize() {
        let supervisor = EmbedderSupervisor::new(config());
        assert!(!supervisor.is_available().await);
    }

    #[tokio::test]
    async fn embed_without_initialize_fails_with_process_exited() {
        let supervisor = EmbedderSupervisor::new(config());
        let err = supervisor
            .embed(&["hello".to_string()], false)
            .await
            .expect_err("no child spawned");
        assert!(matches!(err, Error::EmbedProcessExited));
    }

    #[tokio::test]
    async fn should_restart_is_false_with_no_child() {
        let supervisor = EmbedderSupervisor::new(config());
        assert!(!supervisor.should_restart().await);
    }
}
