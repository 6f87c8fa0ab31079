//! Re-index Decision Engine (C5).
//!
//! Pure functions over `(path, record)` state; no I/O. Kept side-effect
//! free so the pipeline and the watcher can both call `should_reindex`
//! without coordinating on ownership of the file status repository.

use std::path::Path;
use std::time::Duration;

use crate::parser::ParserRegistry;
use crate::types::{FileState, FileStatus};

const FAILURE_RETRY_WINDOW_MS: i64 = Duration::from_secs(24 * 3600).as_millis() as i64;

/// Decide whether `path` must be (re-)processed.
///
/// `current_hash` is the file hash computed from the file's current
/// `(size, mtime_ms)`; `now_ms` is the caller's notion of the current
/// time (injected so tests can control the 24h retry window).
pub fn should_reindex(
    registry: &ParserRegistry,
    path: &Path,
    record: Option<&FileStatus>,
    current_hash: &str,
    now_ms: i64,
) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let Some(current_version) = registry.version(ext) else {
        return false;
    };

    let Some(record) = record else {
        return true;
    };

    if current_hash != record.file_hash {
        return true;
    }

    if record.parser_version < current_version {
        return true;
    }

    if matches!(record.status, FileState::Failed | FileState::Error) {
        let last_retry = record.last_retry.unwrap_or(0);
        if now_ms - last_retry > FAILURE_RETRY_WINDOW_MS {
            return true;
        }
    }

    false
}

/// A record flagged as outdated by [`sweep_for_upgrades`], with the
/// extension that triggered it.
#[derive(Debug, Clone)]
pub struct UpgradeCandidate {
    /// The now-outdated file status record.
    pub record: FileStatus,
}

/// Scan every record; mark any whose parser version is behind the
/// registry's current version for that extension as `outdated`, and
/// return the list so the caller can schedule re-indexing.
///
/// Historical failures for extensions with a known-broken parser
/// generation (tracked in [`ParserRegistry::broken_versions`]) are also
/// re-queued regardless of the 24h retry window.
pub fn sweep_for_upgrades(
    registry: &ParserRegistry,
    records: &[FileStatus],
) -> Vec<UpgradeCandidate> {
    let mut candidates = Vec::new();

    for record in records {
        let Some(ext) = record.path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let Some(current_version) = registry.version(ext) else {
            continue;
        };

        let mut outdated = record.clone();
        let mut flagged = false;

        if record.parser_version < current_version && record.status == FileState::Indexed {
            outdated.status = FileState::Outdated;
            flagged = true;
        }

        if registry
            .broken_versions(ext)
            .contains(&record.parser_version)
            && matches!(record.status, FileState::Failed | FileState::Error)
        {
            outdated.status = FileState::Outdated;
            outdated.last_retry = None;
            flagged = true;
        }

        if flagged {
            candidates.push(UpgradeCandidate { record: outdated });
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserRegistry;
    use std::path::PathBuf;

    fn status(hash: &str, version: u32, state: FileState, last_retry: Option<i64>) -> FileStatus {
        FileStatus {
            path: PathBuf::from("/docs/a.txt"),
            status: state,
            parser_version: version,
            chunk_count: 1,
            error_message: None,
            last_modified: 0,
            indexed_at: 0,
            file_hash: hash.into(),
            last_retry,
        }
    }

    #[test]
    fn unsupported_extension_never_reindexes() {
        let registry = ParserRegistry::new();
        let result = should_reindex(&registry, Path::new("/docs/a.zzz"), None, "h", 0);
        assert!(!result);
    }

    #[test]
    fn absent_record_always_reindexes() {
        let registry = ParserRegistry::new();
        let result = should_reindex(&registry, Path::new("/docs/a.txt"), None, "h", 0);
        assert!(result);
    }

    #[test]
    fn changed_hash_forces_reindex() {
        let registry = ParserRegistry::new();
        let record = status("old", 1, FileState::Indexed, None);
        assert!(should_reindex(
            &registry,
            Path::new("/docs/a.txt"),
            Some(&record),
            "new",
            0
        ));
    }

    #[test]
    fn unchanged_file_up_to_date_parser_does_not_reindex() {
        let registry = ParserRegistry::new();
        let record = status("h", registry.version("txt").expect("txt registered"), FileState::Indexed, None);
        assert!(!should_reindex(
            &registry,
            Path::new("/docs/a.txt"),
            Some(&record),
            "h",
            0
        ));
    }

    #[test]
    fn stale_parser_version_forces_reindex() {
        let registry = ParserRegistry::new();
        let record = status("h", 0, FileState::Indexed, None);
        assert!(should_reindex(
            &registry,
            Path::new("/docs/a.txt"),
            Some(&record),
            "h",
            0
        ));
    }

    #[test]
    fn recent_failure_does_not_retry() {
        let registry = ParserRegistry::new();
        let version = registry.version("txt").expect("txt registered");
        let record = status("h", version, FileState::Failed, Some(1_000));
        assert!(!should_reindex(
            &registry,
            Path::new("/docs/a.txt"),
            Some(&record),
            "h",
            1_000 + 60_000
        ));
    }

    #[test]
    fn failure_older_than_24h_retries() {
        let registry = ParserRegistry::new();
        let version = registry.version("txt").expect("txt registered");
        let record = status("h", version, FileState::Failed, Some(0));
        assert!(should_reindex(
            &registry,
            Path::new("/docs/a.txt"),
            Some(&record),
            "h",
            FAILURE_RETRY_WINDOW_MS + 1
        ));
    }
}
