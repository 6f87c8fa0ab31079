//! semantica -- command-line client for the `semantica-daemon` Query API
//! (spec.md §6). Thin by design: every subcommand is a single
//! request/response round trip over the daemon's IPC transport.

mod client;
mod protocol;

use anyhow::Result;
use clap::{Parser, Subcommand};
use semantica_core::config::Config;

/// semantica -- command-line client for the local semantic search daemon
#[derive(Parser, Debug)]
#[command(name = "semantica", version, about = "Command-line client for the semantica search daemon")]
struct Cli {
    /// Pipe/socket name override, matching the daemon's `--pipe-name`.
    #[arg(long, global = true)]
    pipe_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a semantic search query against the indexed corpus.
    Search {
        query: String,
        /// Maximum number of hits to return.
        #[arg(long, default_value_t = 100)]
        k: usize,
    },

    /// Folder watching and indexing controls.
    #[command(subcommand)]
    Index(IndexCommands),

    /// Database inspection and maintenance.
    #[command(subcommand)]
    Db(DbCommands),

    /// Embedding model status.
    #[command(subcommand)]
    Model(ModelCommands),

    /// Daemon diagnostics.
    #[command(subcommand)]
    Diagnostics(DiagnosticsCommands),

    /// Ask the daemon to shut down.
    Shutdown,
}

#[derive(Subcommand, Debug)]
enum IndexCommands {
    /// Start watching a set of folders, running an initial full scan.
    WatchStart {
        /// Folders to watch (absolute paths).
        folders: Vec<String>,
    },
    /// Stop watching the currently-watched folders.
    WatchStop,
    /// Report queue depth and progress.
    Progress,
    /// Pause embedding of newly submitted files.
    Pause,
    /// Resume a paused queue.
    Resume,
    /// Cancel in-flight processing for a single file.
    Cancel { path: String },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Print folder/vector statistics.
    Stats,
    /// Drop every indexed vector and file-status record.
    Clear,
}

#[derive(Subcommand, Debug)]
enum ModelCommands {
    /// Report whether the embedder is ready and its declared dimension.
    Check,
    /// Request the embedder sidecar download its model.
    Download,
}

#[derive(Subcommand, Debug)]
enum DiagnosticsCommands {
    /// Print the daemon's recent log lines.
    Logs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let cli = Cli::parse();
    let pipe_name = cli.pipe_name.unwrap_or_else(|| protocol::default_pipe_name(&Config::data_dir()));

    let (method, params) = match cli.command {
        Commands::Search { query, k } => ("search", Some(serde_json::json!({ "query": query, "k": k }))),

        Commands::Index(IndexCommands::WatchStart { folders }) => {
            ("index.watchStart", Some(serde_json::json!({ "folders": folders })))
        }
        Commands::Index(IndexCommands::WatchStop) => ("index.watchStop", None),
        Commands::Index(IndexCommands::Progress) => ("index.progress", None),
        Commands::Index(IndexCommands::Pause) => ("index.pause", None),
        Commands::Index(IndexCommands::Resume) => ("index.resume", None),
        Commands::Index(IndexCommands::Cancel { path }) => ("index.cancel", Some(serde_json::json!({ "path": path }))),

        Commands::Db(DbCommands::Stats) => ("db.stats", None),
        Commands::Db(DbCommands::Clear) => ("db.clear", None),

        Commands::Model(ModelCommands::Check) => ("model.check", None),
        Commands::Model(ModelCommands::Download) => ("model.download", None),

        Commands::Diagnostics(DiagnosticsCommands::Logs) => ("diagnostics.getLogs", None),

        Commands::Shutdown => ("shutdown", None),
    };

    tracing::debug!(method, pipe = %pipe_name, "sending request");

    match client::call(&pipe_name, method, params).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
