//! Loads and saves a polyester manifest: a directory tree of
//! `files/`, `templates/`, `vars/`, `secrets/`, and `plans/` subdirectories,
//! either on disk or packed into a gzip+tar archive.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Gzip header comment written/expected on polyester archives, so a
/// `file`-type sniff (or a curious `zcat`) can tell what it's looking at
/// before unpacking.
pub const ARCHIVE_COMMENT: &str = "Polyester";
/// Magic bytes written as the first tar entry's contents, checked before
/// trusting the rest of the archive.
pub const ARCHIVE_MAGIC: &[u8] = b"+vRE4eUD3Mi53e6J4sE6wKE42UBR5EJrnjeffROm=";
const MAGIC_ENTRY_NAME: &str = ".polyester-magic";
/// Archives larger than this (decompressed) are rejected outright, as a
/// bound on how much a single `polyester apply --file` invocation can be
/// made to inflate.
pub const MAX_ARCHIVE_SIZE: u64 = 256 * 1024 * 1024;

const ASSET_DIRS: [&str; 4] = ["files", "templates", "vars", "secrets"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("archive entry {0:?} uses an unsafe path")]
    UnsafePath(String),
    #[error("archive exceeds the {MAX_ARCHIVE_SIZE}-byte limit")]
    TooLarge,
    #[error("archive is missing its polyester magic header")]
    BadMagic,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A manifest's in-memory contents: every asset directory's files keyed by
/// their path relative to that directory, plus the `plans/*.sh` scripts and
/// the root `polyester.sh`.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub root_script: Option<Vec<u8>>,
    pub plans: BTreeMap<String, Vec<u8>>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub templates: BTreeMap<String, Vec<u8>>,
    pub vars: BTreeMap<String, Vec<u8>>,
    pub secrets: BTreeMap<String, Vec<u8>>,
}

impl Manifest {
    fn asset_map_mut(&mut self, dir: &str) -> Option<&mut BTreeMap<String, Vec<u8>>> {
        match dir {
            "files" => Some(&mut self.files),
            "templates" => Some(&mut self.templates),
            "vars" => Some(&mut self.vars),
            "secrets" => Some(&mut self.secrets),
            _ => None,
        }
    }

    /// Loads a manifest from an on-disk directory tree.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ManifestError::NotADirectory(root.to_path_buf()));
        }

        let mut m = Manifest::default();

        let root_script_path = root.join("polyester.sh");
        if root_script_path.is_file() {
            m.root_script = Some(std::fs::read(&root_script_path)?);
        }

        let plans_dir = root.join("plans");
        if plans_dir.is_dir() {
            for entry in walkdir::WalkDir::new(&plans_dir).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&plans_dir)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                m.plans.insert(rel, std::fs::read(entry.path())?);
            }
        }

        for dir in ASSET_DIRS {
            let dir_path = root.join(dir);
            if !dir_path.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir_path).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&dir_path)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                let bytes = std::fs::read(entry.path())?;
                m.asset_map_mut(dir).unwrap().insert(rel, bytes);
            }
        }

        Ok(m)
    }

    /// Writes the manifest back out to an on-disk directory tree,
    /// overwriting any existing contents of the asset subdirectories.
    pub fn save_dir(&self, root: impl AsRef<Path>) -> Result<(), ManifestError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        if let Some(script) = &self.root_script {
            std::fs::write(root.join("polyester.sh"), script)?;
        }

        write_tree(&root.join("plans"), &self.plans)?;
        write_tree(&root.join("files"), &self.files)?;
        write_tree(&root.join("templates"), &self.templates)?;
        write_tree(&root.join("vars"), &self.vars)?;
        write_tree(&root.join("secrets"), &self.secrets)?;
        Ok(())
    }

    /// Packs the manifest into a gzip-compressed tar archive tagged with
    /// the polyester magic header and gzip comment.
    pub fn save_archive<W: Write>(&self, writer: W) -> Result<(), ManifestError> {
        let mut gz = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
        {
            let mut builder = tar::Builder::new(&mut gz);
            append_bytes(&mut builder, MAGIC_ENTRY_NAME, ARCHIVE_MAGIC)?;
            if let Some(script) = &self.root_script {
                append_bytes(&mut builder, "polyester.sh", script)?;
            }
            append_tree(&mut builder, "plans", &self.plans)?;
            append_tree(&mut builder, "files", &self.files)?;
            append_tree(&mut builder, "templates", &self.templates)?;
            append_tree(&mut builder, "vars", &self.vars)?;
            append_tree(&mut builder, "secrets", &self.secrets)?;
            builder.finish()?;
        }
        gz.finish()?;
        Ok(())
    }

    /// Unpacks a gzip+tar archive produced by [`Manifest::save_archive`],
    /// rejecting unsafe entry paths and oversized archives before trusting
    /// any of their contents.
    pub fn load_archive<R: Read>(reader: R) -> Result<Self, ManifestError> {
        let gz = flate2::read::GzDecoder::new(reader);
        let mut archive = tar::Archive::new(gz);

        let mut m = Manifest::default();
        let mut total: u64 = 0;
        let mut saw_magic = false;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_path_buf();
            let rel = safe_relative_path(&path)?;

            let size = entry.header().size()?;
            total += size;
            if total > MAX_ARCHIVE_SIZE {
                return Err(ManifestError::TooLarge);
            }

            let mut buf = Vec::with_capacity(size as usize);
            entry.read_to_end(&mut buf)?;

            if rel == MAGIC_ENTRY_NAME {
                if buf != ARCHIVE_MAGIC {
                    return Err(ManifestError::BadMagic);
                }
                saw_magic = true;
                continue;
            }

            if rel == "polyester.sh" {
                m.root_script = Some(buf);
                continue;
            }

            let mut components = rel.splitn(2, '/');
            let top = components.next().unwrap_or_default();
            let rest = components.next();

            match (top, rest) {
                ("plans", Some(rest)) => {
                    m.plans.insert(rest.to_string(), buf);
                }
                (dir, Some(rest)) if ASSET_DIRS.contains(&dir) => {
                    m.asset_map_mut(dir).unwrap().insert(rest.to_string(), buf);
                }
                _ => {}
            }
        }

        if !saw_magic {
            return Err(ManifestError::BadMagic);
        }

        Ok(m)
    }
}

fn write_tree(dir: &Path, files: &BTreeMap<String, Vec<u8>>) -> Result<(), ManifestError> {
    if files.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    for (rel, bytes) in files {
        let dest = dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)?;
    }
    Ok(())
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, bytes: &[u8]) -> Result<(), ManifestError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    prefix: &str,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<(), ManifestError> {
    for (rel, bytes) in files {
        append_bytes(builder, &format!("{prefix}/{rel}"), bytes)?;
    }
    Ok(())
}

/// Rejects absolute paths, `..` traversal, and Windows drive-letter
/// prefixes (`C:\...`) in an archive entry path, returning the normalized
/// `/`-separated relative path otherwise.
fn safe_relative_path(path: &Path) -> Result<String, ManifestError> {
    let raw = path.to_string_lossy();
    if raw.len() >= 2 && raw.as_bytes()[1] == b':' && raw.as_bytes()[0].is_ascii_alphabetic() {
        return Err(ManifestError::UnsafePath(raw.to_string()));
    }
    if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ManifestError::UnsafePath(raw.to_string()));
    }
    Ok(raw.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Manifest {
        let mut m = Manifest::default();
        m.root_script = Some(b"echo hi\n".to_vec());
        m.plans.insert("main.sh".to_string(), b"touch /tmp/a\n".to_vec());
        m.files.insert("etc/app.conf".to_string(), b"key=value\n".to_vec());
        m
    }

    #[test]
    fn dir_round_trip() {
        let dir = tempdir().unwrap();
        let m = sample();
        m.save_dir(dir.path()).unwrap();
        let loaded = Manifest::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.root_script, m.root_script);
        assert_eq!(loaded.plans, m.plans);
        assert_eq!(loaded.files, m.files);
    }

    #[test]
    fn archive_round_trip() {
        let m = sample();
        let mut buf = Vec::new();
        m.save_archive(&mut buf).unwrap();
        let loaded = Manifest::load_archive(std::io::Cursor::new(buf)).unwrap();
        assert_eq!(loaded.root_script, m.root_script);
        assert_eq!(loaded.plans, m.plans);
        assert_eq!(loaded.files, m.files);
    }

    #[test]
    fn archive_without_magic_is_rejected() {
        let mut buf = Vec::new();
        {
            let mut gz = flate2::write::GzEncoder::new(&mut buf, flate2::Compression::default());
            {
                let mut builder = tar::Builder::new(&mut gz);
                append_bytes(&mut builder, "polyester.sh", b"echo hi\n").unwrap();
                builder.finish().unwrap();
            }
            gz.finish().unwrap();
        }
        let err = Manifest::load_archive(std::io::Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ManifestError::BadMagic));
    }

    #[test]
    fn load_dir_rejects_non_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(Manifest::load_dir(&file), Err(ManifestError::NotADirectory(_))));
    }
}
