//! semantica daemon -- persistent background engine with IPC.
//!
//! Keeps the semantica engine hot in memory and exposes the Query API
//! (spec.md §6) over named pipes (Windows) or Unix domain sockets
//! (Linux/macOS), plus `stage`/`indexer:progress` push notifications.

mod diagnostics;
mod ipc;
mod protocol;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use semantica_core::config::Config;
use semantica_core::Engine;
use tokio::sync::broadcast;

use crate::diagnostics::LogRing;
use crate::ipc::Event;

/// semantica daemon -- persistent background indexing/search engine
#[derive(Parser, Debug)]
#[command(name = "semantica-daemon", version, about = "Persistent background engine with IPC interface")]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Named pipe/socket name override.
    #[arg(long)]
    pipe_name: Option<String>,
}

/// Fixed exit code table for unrecoverable states (spec.md §6).
mod exit_codes {
    pub const CLEAN: i32 = 0;
    pub const STATE_MACHINE_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let logs = LogRing::new();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).with_writer(logs.clone()).init();

    let data_dir = Config::data_dir();
    let config = match Config::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    tracing::info!(data_dir = %data_dir.display(), "initializing daemon engine");

    let (engine, channels) = Engine::new(config)?;
    let engine = Arc::new(engine);

    let (events_tx, _events_rx) = broadcast::channel::<Event>(256);
    spawn_event_forwarders(engine.clone(), channels, events_tx.clone());

    let start_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = start_engine.start().await {
            tracing::error!(error = %e, "engine failed to reach ready");
        }
    });

    let pipe_name = args.pipe_name.unwrap_or_else(|| ipc::default_pipe_name(&data_dir));
    tracing::info!(pipe = %pipe_name, "starting IPC server");

    let shutdown_engine = engine.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        if let Err(e) = shutdown_engine.shutdown().await {
            tracing::warn!(error = %e, "error during graceful shutdown");
        }
        std::process::exit(exit_codes::CLEAN);
    });

    if let Err(e) = ipc::serve(engine, events_tx, logs, &pipe_name).await {
        tracing::error!(error = %e, "IPC server exited with error");
        std::process::exit(exit_codes::STATE_MACHINE_ERROR);
    }

    Ok(())
}

/// Forward stage progress onto the broadcast channel verbatim, and
/// re-derive an `indexer:progress` snapshot from the engine every time a
/// queue event fires (spec.md §6 names the event payload as the same
/// `ProgressState` `index.progress()` returns, not the queue's raw
/// per-file events).
fn spawn_event_forwarders(
    engine: Arc<Engine>,
    channels: semantica_core::pipeline::EngineChannels,
    events_tx: broadcast::Sender<Event>,
) {
    let semantica_core::pipeline::EngineChannels { mut stage_progress, mut queue_events } = channels;

    let tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(progress) = stage_progress.recv().await {
            let _ = tx.send(Event::Stage(progress));
        }
    });

    tokio::spawn(async move {
        while let Some(event) = queue_events.recv().await {
            tracing::debug!(?event, "queue event");
            if let Ok(progress) = engine.progress() {
                let _ = events_tx.send(Event::IndexProgress(progress));
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
