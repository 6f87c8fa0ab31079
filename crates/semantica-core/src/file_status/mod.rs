//! File Status Repository (C4).
//!
//! Persistent keyed store on `path`, backed by SQLite. Writes are durable
//! before they acknowledge (SQLite WAL + `synchronous=NORMAL`); concurrent
//! `upsert` on the same path is serialized by the connection mutex, so the
//! last writer wins by call order. Queries run against a single connection
//! snapshot, so a `query_all`/`query_by` never observes a partial write.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{FileState, FileStatus};

/// SQLite-backed file status repository.
pub struct FileStatusRepository {
    conn: Mutex<Connection>,
}

impl FileStatusRepository {
    /// Open or create a file status database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch the record for `path`, if one exists.
    pub fn get(&self, path: &Path) -> Result<Option<FileStatus>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT path, status, parser_version, chunk_count, error_message, \
                 last_modified, indexed_at, file_hash, last_retry \
                 FROM file_status WHERE path = ?1",
                params![path.to_string_lossy()],
                Self::row_to_status,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the record for `record.path`.
    pub fn upsert(&self, record: &FileStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO file_status \
             (path, status, parser_version, chunk_count, error_message, \
              last_modified, indexed_at, file_hash, last_retry) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(path) DO UPDATE SET \
               status = excluded.status, \
               parser_version = excluded.parser_version, \
               chunk_count = excluded.chunk_count, \
               error_message = excluded.error_message, \
               last_modified = excluded.last_modified, \
               indexed_at = excluded.indexed_at, \
               file_hash = excluded.file_hash, \
               last_retry = excluded.last_retry",
            params![
                record.path.to_string_lossy(),
                record.status.as_str(),
                record.parser_version,
                record.chunk_count,
                record.error_message,
                record.last_modified,
                record.indexed_at,
                record.file_hash,
                record.last_retry,
            ],
        )?;
        Ok(())
    }

    /// Remove the record for `path`, if any.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM file_status WHERE path = ?1",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }

    /// Return every record, snapshot-consistent at the time of the call.
    pub fn query_all(&self) -> Result<Vec<FileStatus>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, status, parser_version, chunk_count, error_message, \
             last_modified, indexed_at, file_hash, last_retry FROM file_status",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_status)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Return every record matching `predicate`, evaluated over a single
    /// snapshot of the table.
    pub fn query_by(&self, predicate: impl Fn(&FileStatus) -> bool) -> Result<Vec<FileStatus>> {
        Ok(self
            .query_all()?
            .into_iter()
            .filter(predicate)
            .collect())
    }

    fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileStatus> {
        let path: String = row.get(0)?;
        let status: String = row.get(1)?;
        Ok(FileStatus {
            path: PathBuf::from(path),
            status: FileState::from_str_lossy(&status),
            parser_version: row.get(2)?,
            chunk_count: row.get(3)?,
            error_message: row.get(4)?,
            last_modified: row.get(5)?,
            indexed_at: row.get(6)?,
            file_hash: row.get(7)?,
            last_retry: row.get(8)?,
        })
    }

    /// Remove every record (`db.clear()`, spec.md §6).
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM file_status", [])?;
        Ok(())
    }

    /// Run an integrity check on the database.
    pub fn check_integrity(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &str) -> FileStatus {
        FileStatus {
            path: PathBuf::from(path),
            status: FileState::Indexed,
            parser_version: 1,
            chunk_count: 3,
            error_message: None,
            last_modified: 1000,
            indexed_at: 1001,
            file_hash: "abc123".into(),
            last_retry: None,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FileStatusRepository::open(&dir.path().join("status.db")).expect("open");
        repo.upsert(&sample("/docs/a.txt")).expect("upsert");
        let fetched = repo.get(Path::new("/docs/a.txt")).expect("get").expect("present");
        assert_eq!(fetched.chunk_count, 3);
        assert_eq!(fetched.status, FileState::Indexed);
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FileStatusRepository::open(&dir.path().join("status.db")).expect("open");
        repo.upsert(&sample("/docs/a.txt")).expect("upsert");
        let mut updated = sample("/docs/a.txt");
        updated.chunk_count = 7;
        updated.status = FileState::Outdated;
        repo.upsert(&updated).expect("upsert again");
        let fetched = repo.get(Path::new("/docs/a.txt")).expect("get").expect("present");
        assert_eq!(fetched.chunk_count, 7);
        assert_eq!(fetched.status, FileState::Outdated);
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FileStatusRepository::open(&dir.path().join("status.db")).expect("open");
        repo.upsert(&sample("/docs/a.txt")).expect("upsert");
        repo.delete(Path::new("/docs/a.txt")).expect("delete");
        assert!(repo.get(Path::new("/docs/a.txt")).expect("get").is_none());
    }

    #[test]
    fn clear_removes_every_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FileStatusRepository::open(&dir.path().join("status.db")).expect("open");
        repo.upsert(&sample("/docs/a.txt")).expect("upsert");
        repo.upsert(&sample("/docs/b.txt")).expect("upsert");
        repo.clear().expect("clear");
        assert!(repo.query_all().expect("query_all").is_empty());
    }

    #[test]
    fn query_by_filters_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FileStatusRepository::open(&dir.path().join("status.db")).expect("open");
        repo.upsert(&sample("/docs/a.txt")).expect("upsert");
        let mut failed = sample("/docs/b.txt");
        failed.status = FileState::Failed;
        repo.upsert(&failed).expect("upsert");

        let failed_only = repo
            .query_by(|r| r.status == FileState::Failed)
            .expect("query_by");
        assert_eq!(failed_only.len(), 1);
        assert_eq!(failed_only[0].path, PathBuf::from("/docs/b.txt"));
    }
}
