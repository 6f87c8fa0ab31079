//! Lifecycle State Machine (C11).
//!
//! Tracks the daemon's ordered startup sequence and gates inbound Query
//! API requests until the machine reaches `Ready`. Each stage runs under
//! its own configurable deadline; a stage that errors or times out moves
//! the machine to the `Error` sink, from which nothing transitions out.
//!
//! The machine doesn't know how to run a stage's work itself — callers
//! (the pipeline orchestrator) supply it as a future via
//! [`LifecycleStateMachine::run_stage`], keeping this module decoupled
//! from the concrete subsystems it sequences.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout as tokio_timeout;

use crate::config::StageTimeouts;
use crate::error::{Error, Result};
use crate::types::{Stage, StageProgress};

/// Requests answered regardless of lifecycle stage (spec.md §4.11's
/// `{init, checkModel, diagnostics:getLogs}` whitelist, named here after
/// their public Query API spellings: `model.check`, `diagnostics.getLogs`).
const ALWAYS_ALLOWED: &[&str] = &["init", "model.check", "diagnostics.getLogs"];

/// Orchestrates and gates the daemon's ordered startup sequence.
pub struct LifecycleStateMachine {
    stage: Mutex<Stage>,
    progress: mpsc::Sender<StageProgress>,
    timeouts: StageTimeouts,
}

impl LifecycleStateMachine {
    pub fn new(progress: mpsc::Sender<StageProgress>, timeouts: StageTimeouts) -> Self {
        Self { stage: Mutex::new(Stage::Uninitialized), progress, timeouts }
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    /// True once the machine has reached `Ready`.
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Whether `method` may be answered given the current stage.
    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.is_ready() || ALWAYS_ALLOWED.contains(&method)
    }

    /// Reject `method` with [`Error::NotReady`] unless it's allowed at the
    /// current stage.
    pub fn gate(&self, method: &str) -> Result<()> {
        if self.is_method_allowed(method) {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Publish a progress update for the current stage without advancing it.
    pub async fn report_progress(&self, message: Option<String>, progress: Option<u8>) {
        let stage = self.stage();
        let _ = self.progress.send(StageProgress::new(stage, message, progress)).await;
    }

    /// Transition to `to` and run `work` under that stage's configured
    /// timeout. On success the machine remains at `to`; on error or
    /// timeout the machine moves to `Error` and the failure is returned.
    pub async fn run_stage<F, Fut, T>(&self, to: Stage, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transition(to)?;
        let _ = self.progress.send(StageProgress::new(to, None, None)).await;

        let deadline = Duration::from_millis(self.stage_timeout_ms(to));
        match tokio_timeout(deadline, work()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.fail(to, e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                self.fail(to, "stage-timeout".to_string()).await;
                Err(Error::StageTimeout { stage: to })
            }
        }
    }

    /// Force the machine into `Error`, e.g. on an out-of-band fatal fault.
    pub async fn force_error(&self, reason: impl Into<String>) {
        self.fail(self.stage(), reason.into()).await;
    }

    fn transition(&self, to: Stage) -> Result<()> {
        let mut stage = self.stage.lock();
        if !Stage::is_valid_transition(*stage, to) {
            return Err(Error::Config {
                message: format!("invalid stage transition {:?} -> {to:?}", *stage),
            });
        }
        *stage = to;
        Ok(())
    }

    async fn fail(&self, at: Stage, reason: String) {
        {
            let mut stage = self.stage.lock();
            if Stage::is_valid_transition(*stage, Stage::Error) {
                *stage = Stage::Error;
            }
        }
        let _ = self.progress.send(StageProgress::new(Stage::Error, Some(reason), None)).await;
        let _ = at;
    }

    fn stage_timeout_ms(&self, stage: Stage) -> u64 {
        match stage {
            Stage::StartingSidecar => self.timeouts.worker_spawn,
            Stage::SidecarReady => self.timeouts.embedder_init,
            Stage::InitializingDb => self.timeouts.db_init,
            Stage::DbReady => self.timeouts.db_load,
            Stage::LoadingFiles => self.timeouts.db_load,
            Stage::ScanningFolders => self.timeouts.folder_scan,
            Stage::Ready => self.timeouts.ready,
            Stage::Uninitialized | Stage::Error => u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> (LifecycleStateMachine, mpsc::Receiver<StageProgress>) {
        let (tx, rx) = mpsc::channel(16);
        let timeouts = StageTimeouts {
            worker_spawn: 1000,
            db_init: 1000,
            db_load: 1000,
            model_check: 1000,
            model_download: 1000,
            embedder_init: 1000,
            folder_scan: 1000,
            ready: 1000,
        };
        (LifecycleStateMachine::new(tx, timeouts), rx)
    }

    #[tokio::test]
    async fn gates_requests_until_ready() {
        let (lifecycle, _rx) = machine();
        assert!(lifecycle.gate("search").is_err());
        assert!(lifecycle.gate("init").is_ok());
        assert!(lifecycle.gate("diagnostics.getLogs").is_ok());
    }

    #[tokio::test]
    async fn valid_forward_sequence_reaches_ready() {
        let (lifecycle, _rx) = machine();
        lifecycle.run_stage(Stage::StartingSidecar, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::SidecarReady, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::InitializingDb, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::DbReady, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::LoadingFiles, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::ScanningFolders, || async { Ok(()) }).await.unwrap();
        lifecycle.run_stage(Stage::Ready, || async { Ok(()) }).await.unwrap();

        assert!(lifecycle.is_ready());
        assert!(lifecycle.gate("search").is_ok());
    }

    #[tokio::test]
    async fn skipping_a_stage_is_rejected() {
        let (lifecycle, _rx) = machine();
        let err = lifecycle.run_stage(Stage::InitializingDb, || async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn stage_failure_moves_to_error_sink() {
        let (lifecycle, _rx) = machine();
        lifecycle.run_stage(Stage::StartingSidecar, || async { Ok(()) }).await.unwrap();
        let err = lifecycle
            .run_stage(Stage::SidecarReady, || async { Err(Error::NotReady) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady));
        assert_eq!(lifecycle.stage(), Stage::Error);

        let retry = lifecycle.run_stage(Stage::InitializingDb, || async { Ok(()) }).await;
        assert!(retry.is_err());
    }

    #[tokio::test]
    async fn stage_timeout_moves_to_error() {
        let (tx, _rx) = mpsc::channel(16);
        let timeouts = StageTimeouts {
            worker_spawn: 10,
            db_init: 1000,
            db_load: 1000,
            model_check: 1000,
            model_download: 1000,
            embedder_init: 1000,
            folder_scan: 1000,
            ready: 1000,
        };
        let lifecycle = LifecycleStateMachine::new(tx, timeouts);
        let err = lifecycle
            .run_stage(Stage::StartingSidecar, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StageTimeout { .. }));
        assert_eq!(lifecycle.stage(), Stage::Error);
    }
}
