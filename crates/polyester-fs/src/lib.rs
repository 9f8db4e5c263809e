//! Rooted filesystem abstraction: every path an operator touches is
//! resolved relative to a root first, so operators never see (and cannot
//! accidentally escape to) an absolute path the manifest didn't declare.

use polyester_glob::glob_relative;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path {0:?} escapes its root")]
    Escapes(String),
    #[error("path {0:?} is absolute, which is not permitted here")]
    Absolute(String),
    #[error("pattern {0:?} matched no files under {1:?}/{2}")]
    NoMatch(String, String, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A filesystem rooted at a fixed directory: every operation takes a path
/// relative to that root and every result (`abs`, `join`) stays under it.
pub trait RootedFs {
    fn root(&self) -> &Path;

    fn abs(&self, name: &str) -> PathBuf {
        self.join(&[name])
    }

    fn join(&self, parts: &[&str]) -> PathBuf {
        let mut p = self.root().to_path_buf();
        for part in parts {
            p.push(part);
        }
        p
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        Ok(std::fs::read(self.abs(name))?)
    }

    fn metadata(&self, name: &str) -> Result<std::fs::Metadata, FsError> {
        Ok(std::fs::metadata(self.abs(name))?)
    }

    fn read_dir(&self, name: &str) -> Result<Vec<PathBuf>, FsError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.abs(name))? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    /// Relative paths (from this root) of files matching `pattern`.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError> {
        Ok(glob_relative(self.root(), pattern)?)
    }
}

/// Rejects absolute paths and `..` components before they ever reach the
/// filesystem layer.
fn reject_escape(name: &str) -> Result<(), FsError> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(FsError::Absolute(name.to_string()));
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(FsError::Escapes(name.to_string()));
    }
    Ok(())
}

/// The host filesystem, rooted at an arbitrary directory (typically the
/// target of `copy`/`touch`/`mkdir`, i.e. the machine being configured, not
/// the manifest).
#[derive(Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RootedFs for HostFs {
    fn root(&self) -> &Path {
        &self.root
    }
}

/// One of the manifest's standard asset directories: `files/`, `templates/`,
/// `vars/`, `secrets/`, `plans/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Files,
    Templates,
    Vars,
    Secrets,
    Plans,
}

impl AssetKind {
    fn dir(self) -> &'static str {
        match self {
            AssetKind::Files => "files",
            AssetKind::Templates => "templates",
            AssetKind::Vars => "vars",
            AssetKind::Secrets => "secrets",
            AssetKind::Plans => "plans",
        }
    }
}

/// The manifest directory's filesystem: rooted at the manifest root, but
/// aware of an optionally "active" subplan directory that asset lookups
/// prefer before falling back to the manifest root.
#[derive(Clone)]
pub struct PlanDirFs {
    root: PathBuf,
    active_subplan: Option<String>,
}

impl PlanDirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active_subplan: None,
        }
    }

    pub fn with_active_subplan(root: impl Into<PathBuf>, subplan: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            active_subplan: Some(subplan.into()),
        }
    }

    /// Resolves `pattern` under `kind`'s asset directory, honoring the
    /// active-subplan/manifest-root/leading-`./` rules: a leading `./`
    /// re-roots at the manifest root regardless of any active subplan; a
    /// leading `../`, an absolute path, or a pattern whose first segment is
    /// literally `plans` is rejected outright; otherwise the active
    /// subplan's copy of the asset directory is searched first, then the
    /// manifest root's. The combined match set must be non-empty.
    pub fn resolve(&self, kind: AssetKind, pattern: &str) -> Result<Vec<PathBuf>, FsError> {
        if pattern.starts_with('/') {
            return Err(FsError::Absolute(pattern.to_string()));
        }
        if pattern.starts_with("../") || pattern == ".." {
            return Err(FsError::Escapes(pattern.to_string()));
        }
        if Path::new(pattern)
            .components()
            .next()
            .map(|c| c.as_os_str() == "plans")
            .unwrap_or(false)
        {
            return Err(FsError::Escapes(pattern.to_string()));
        }

        let (reroot_to_manifest, pattern) = match pattern.strip_prefix("./") {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };

        let mut roots = Vec::new();
        if !reroot_to_manifest {
            if let Some(subplan) = &self.active_subplan {
                roots.push(self.root.join("plans").join(subplan).join(kind.dir()));
            }
        }
        roots.push(self.root.join(kind.dir()));

        let mut matches = Vec::new();
        for root in &roots {
            if root.is_dir() {
                matches.extend(glob_relative(root, pattern)?);
            }
        }

        if matches.is_empty() {
            return Err(FsError::NoMatch(
                pattern.to_string(),
                self.root.display().to_string(),
                kind.dir().to_string(),
            ));
        }

        Ok(matches)
    }
}

impl RootedFs for PlanDirFs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        reject_escape(name)?;
        Ok(std::fs::read(self.abs(name))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn host_fs_reads_under_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let fsys = HostFs::new(dir.path());
        assert_eq!(fsys.read_file("a.txt").unwrap(), b"hi");
    }

    #[test]
    fn resolve_rejects_absolute_and_parent_and_plans() {
        let dir = tempdir().unwrap();
        let pd = PlanDirFs::new(dir.path());
        assert!(matches!(pd.resolve(AssetKind::Files, "/etc/passwd"), Err(FsError::Absolute(_))));
        assert!(matches!(pd.resolve(AssetKind::Files, "../secret"), Err(FsError::Escapes(_))));
        assert!(matches!(pd.resolve(AssetKind::Files, "plans/main"), Err(FsError::Escapes(_))));
    }

    #[test]
    fn resolve_prefers_active_subplan_then_falls_back_to_root() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files").join("a.conf"), b"root").unwrap();
        fs::create_dir_all(dir.path().join("plans").join("sub").join("files")).unwrap();
        fs::write(dir.path().join("plans").join("sub").join("files").join("b.conf"), b"sub").unwrap();

        let pd = PlanDirFs::with_active_subplan(dir.path(), "sub");
        let matches = pd.resolve(AssetKind::Files, "*.conf").unwrap();
        let names: Vec<_> = matches.iter().map(|p| p.display().to_string()).collect();
        assert!(names.iter().any(|n| n.contains("b.conf")));
        assert!(names.iter().any(|n| n.contains("a.conf")));
    }

    #[test]
    fn resolve_leading_dot_slash_reroots_at_manifest() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files").join("a.conf"), b"root").unwrap();
        fs::create_dir_all(dir.path().join("plans").join("sub").join("files")).unwrap();

        let pd = PlanDirFs::with_active_subplan(dir.path(), "sub");
        let matches = pd.resolve(AssetKind::Files, "./a.conf").unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn resolve_fails_on_empty_match() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        let pd = PlanDirFs::new(dir.path());
        assert!(matches!(pd.resolve(AssetKind::Files, "*.conf"), Err(FsError::NoMatch(..))));
    }
}
