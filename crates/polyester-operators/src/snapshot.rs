//! Shared helpers for building [`FileSnapshot`]s from the real filesystem,
//! used by every file-touching operator.

use chrono::{DateTime, Utc};
use polyester_core::FileSnapshot;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Snapshots `path`: absent paths yield `None` rather than an error, since
/// "the file doesn't exist yet" is itself valid, commonly-seen state.
pub fn snapshot(path: &Path) -> std::io::Result<Option<FileSnapshot>> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let sha256 = if meta.is_file() {
        Some(sha256_file(path)?)
    } else {
        None
    };

    Ok(Some(FileSnapshot {
        name: Some(path.display().to_string()),
        is_dir: meta.is_dir(),
        mode: mode_bits(&meta),
        size: meta.len(),
        mtime: meta.modified().ok().map(DateTime::<Utc>::from),
        sha256,
        contents: None,
    }))
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_bytes(&bytes))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_path_snapshots_to_none() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(snapshot(&missing).unwrap().is_none());
    }

    #[test]
    fn file_snapshot_includes_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let snap = snapshot(&path).unwrap().unwrap();
        assert_eq!(snap.sha256, Some(sha256_bytes(b"hello")));
        assert!(!snap.is_dir);
    }
}
