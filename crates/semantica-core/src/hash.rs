//! Content/identity hashing used by the decision engine (C5), the vector
//! table's chunk ids, and the file status repository's `file_hash` column.

use std::path::Path;

/// Deterministic 16-hex MD5 file hash of `path:size:mtime_ms`.
///
/// This is a cheap change detector, not a content hash: it never reads
/// file bytes, so two edits that leave `(size, mtime_ms)` unchanged are
/// indistinguishable (spec.md glossary: "File hash"). Per spec.md §3 the
/// stored form is 16 hex characters, so the 128-bit digest is truncated
/// to its first 8 bytes.
pub fn file_hash(path: &Path, size: u64, mtime_ms: i64) -> String {
    use md5::{Digest, Md5};
    let input = format!("{}:{size}:{mtime_ms}", path.to_string_lossy());
    let digest = Md5::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Stable chunk id derived from `path + offset`, used as the Vector
/// Table's row identity and as `Chunk::id`.
pub fn chunk_id(path: &Path, offset: usize) -> String {
    use xxhash_rust::xxh3::xxh3_64;
    let input = format!("{}:{offset}", path.to_string_lossy());
    format!("{:016x}", xxh3_64(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_hash_is_deterministic() {
        let p = PathBuf::from("/docs/a.txt");
        assert_eq!(file_hash(&p, 11, 1000), file_hash(&p, 11, 1000));
    }

    #[test]
    fn file_hash_changes_with_size_or_mtime() {
        let p = PathBuf::from("/docs/a.txt");
        let h1 = file_hash(&p, 11, 1000);
        let h2 = file_hash(&p, 12, 1000);
        let h3 = file_hash(&p, 11, 1001);
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn file_hash_is_16_hex_chars() {
        let p = PathBuf::from("/docs/a.txt");
        assert_eq!(file_hash(&p, 11, 1000).len(), 16);
    }

    #[test]
    fn chunk_id_differs_by_offset() {
        let p = PathBuf::from("/docs/a.txt");
        assert_ne!(chunk_id(&p, 0), chunk_id(&p, 100));
    }
}
