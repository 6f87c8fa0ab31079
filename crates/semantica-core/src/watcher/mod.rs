//! Folder Watcher (C10).
//!
//! Enumerates supported files under each watched root and emits
//! `PipelineEvent::FileChanged` / `FileDeleted` as the filesystem
//! changes, debounced so editor save bursts coalesce into one event per
//! path. Hidden directories and the configured exclude globs are
//! skipped during both the initial scan and live watching.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;
use crate::types::PipelineEvent;

/// Watches a set of root folders and emits [`PipelineEvent`]s.
///
/// Owned exclusively by the Lifecycle State Machine, per spec.md §3's
/// ownership rule; `watch` is non-blocking (it spawns the underlying
/// debouncers and returns), so the caller drives its own event loop
/// against the shared channel.
pub struct FolderWatcher {
    roots: Vec<PathBuf>,
    extensions: HashSet<String>,
    exclude: GlobSet,
    debounce: Duration,
    handles: Mutex<Vec<Debouncer<notify::RecommendedWatcher>>>,
}

impl FolderWatcher {
    /// Build a watcher for `roots`, restricted to `extensions` (without
    /// leading dots) and skipping any path component matching
    /// `exclude_patterns` or a hidden (dot-prefixed) directory.
    pub fn new(
        roots: Vec<PathBuf>,
        extensions: &[&str],
        exclude_patterns: &[String],
        debounce_ms: u64,
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            builder.add(Glob::new(pattern).map_err(|e| {
                crate::error::Error::Config { message: format!("invalid exclude glob {pattern}: {e}") }
            })?);
        }
        let exclude = builder
            .build()
            .map_err(|e| crate::error::Error::Config { message: e.to_string() })?;

        Ok(Self {
            roots,
            extensions: extensions.iter().map(|s| (*s).to_string()).collect(),
            exclude,
            debounce: Duration::from_millis(debounce_ms),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// True if any path component is hidden or matches an exclude glob.
    fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            (name.starts_with('.') && name != "." && name != "..") || self.exclude.is_match(name.as_ref())
        })
    }

    /// True if `path` has a supported extension and isn't excluded.
    fn is_supported(&self, path: &Path) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(ext))
    }

    /// Walk every root synchronously, sending `FileChanged` for every
    /// supported file found. Returns the count of files discovered.
    pub fn full_scan(&self, tx: &mpsc::Sender<PipelineEvent>) -> Result<usize> {
        let mut count = 0;
        for root in &self.roots {
            count += self.scan_dir(root, tx)?;
        }
        Ok(count)
    }

    fn scan_dir(&self, dir: &Path, tx: &mpsc::Sender<PipelineEvent>) -> Result<usize> {
        let mut count = 0;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read directory during scan");
                return Ok(0);
            }
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if self.is_excluded(&path) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                count += self.scan_dir(&path, tx)?;
            } else if file_type.is_file() && self.is_supported(&path) {
                let _ = tx.blocking_send(PipelineEvent::FileChanged { path });
                count += 1;
            }
        }
        Ok(count)
    }

    /// Start live watching every root. Non-blocking: debouncer handles
    /// are kept alive in `self.handles` until [`FolderWatcher::stop`] is
    /// called or `self` is dropped.
    pub fn watch(&self, tx: mpsc::Sender<PipelineEvent>) -> Result<()> {
        for root in self.roots.clone() {
            let watcher_tx = tx.clone();
            let extensions = self.extensions.clone();
            let exclude = self.exclude.clone();

            let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
                let events = match result {
                    Ok(events) => events,
                    Err(errors) => {
                        for e in errors {
                            warn!(error = %e, "watcher error");
                        }
                        return;
                    }
                };

                let mut seen = HashSet::new();
                for event in events {
                    let path = event.path;
                    if !seen.insert(path.clone()) {
                        continue;
                    }
                    if is_excluded_static(&exclude, &path) {
                        continue;
                    }
                    let supported = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|ext| extensions.contains(ext));
                    if !supported {
                        continue;
                    }
                    let pipeline_event = if path.exists() {
                        PipelineEvent::FileChanged { path }
                    } else {
                        PipelineEvent::FileDeleted { path }
                    };
                    let _ = watcher_tx.blocking_send(pipeline_event);
                }
            })
            .map_err(|e| crate::error::Error::Config { message: format!("failed to create watcher: {e}") })?;

            debouncer
                .watcher()
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|e| {
                    crate::error::Error::Config { message: format!("failed to watch {}: {e}", root.display()) }
                })?;

            self.handles.lock().expect("watcher handles lock poisoned").push(debouncer);
        }

        Ok(())
    }

    /// Stop every active watch, dropping the underlying debouncers.
    pub fn stop(&self) {
        self.handles.lock().expect("watcher handles lock poisoned").clear();
    }
}

fn is_excluded_static(exclude: &GlobSet, path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        (name.starts_with('.') && name != "." && name != "..") || exclude.is_match(name.as_ref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scan_finds_only_supported_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "hello").expect("write");
        std::fs::write(dir.path().join("b.bin"), "skip").expect("write");

        let watcher = FolderWatcher::new(
            vec![dir.path().to_path_buf()],
            &["txt", "md"],
            &["node_modules".to_string(), ".git".to_string()],
            200,
        )
        .expect("build watcher");

        let (tx, mut rx) = mpsc::channel(16);
        let count = watcher.full_scan(&tx).expect("scan");
        drop(tx);
        assert_eq!(count, 1);

        let mut received = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], PipelineEvent::FileChanged { path } if path.ends_with("a.txt")));
    }

    #[test]
    fn full_scan_skips_excluded_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("node_modules")).expect("mkdir");
        std::fs::write(dir.path().join("node_modules/ignored.txt"), "x").expect("write");
        std::fs::write(dir.path().join("kept.txt"), "x").expect("write");

        let watcher = FolderWatcher::new(
            vec![dir.path().to_path_buf()],
            &["txt"],
            &["node_modules".to_string()],
            200,
        )
        .expect("build watcher");

        let (tx, mut rx) = mpsc::channel(16);
        let count = watcher.full_scan(&tx).expect("scan");
        drop(tx);
        assert_eq!(count, 1);
        let event = rx.blocking_recv().expect("one event");
        assert!(matches!(&event, PipelineEvent::FileChanged { path } if path.ends_with("kept.txt")));
    }

    #[test]
    fn full_scan_skips_hidden_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join(".git")).expect("mkdir");
        std::fs::write(dir.path().join(".git/HEAD"), "ref").expect("write");

        let watcher = FolderWatcher::new(vec![dir.path().to_path_buf()], &["txt"], &[], 200)
            .expect("build watcher");

        let (tx, _rx) = mpsc::channel(16);
        let count = watcher.full_scan(&tx).expect("scan");
        assert_eq!(count, 0);
    }
}
