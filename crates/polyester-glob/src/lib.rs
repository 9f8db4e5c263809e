//! `**`-aware include/exclude glob matching used by the FS abstraction and
//! the file-copy operators.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Result of matching a path against an include/exclude pattern pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    Allowed,
    DeniedByExclude,
    DeniedByMissingInclude,
}

impl MatchDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, MatchDecision::Allowed)
    }
}

/// A compiled include/exclude pattern pair. An empty pattern list means "no
/// constraint" for that side.
#[derive(Debug, Clone, Default)]
pub struct IncludeExcludeGlobs {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl IncludeExcludeGlobs {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// Exclude takes precedence over include. An empty include list means
    /// every path is allowed unless excluded.
    pub fn decide_path(&self, path: &Path) -> MatchDecision {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return MatchDecision::DeniedByExclude;
            }
        }
        match &self.include {
            Some(include) if !include.is_match(path) => MatchDecision::DeniedByMissingInclude,
            _ => MatchDecision::Allowed,
        }
    }

    pub fn decide_str(&self, path: &str) -> MatchDecision {
        self.decide_path(Path::new(path))
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, globset::Error> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

/// Matches `**`-bearing glob patterns against file paths under `root`,
/// returning paths relative to `root` in sorted order. Used by operators
/// that take source globs (`copy`, `pcopy`, `atomic-copy`).
pub fn glob_relative(root: &Path, pattern: &str) -> std::io::Result<Vec<std::path::PathBuf>> {
    let glob = Glob::new(pattern)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
        .compile_matcher();
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if glob.is_match(rel) {
            out.push(rel.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn empty_patterns_allow_everything() {
        let ieg = IncludeExcludeGlobs::new(&[], &[]).unwrap();
        assert_eq!(ieg.decide_str("anything/here.txt"), MatchDecision::Allowed);
    }

    #[test]
    fn exclude_wins_over_include() {
        let ieg = IncludeExcludeGlobs::new(
            &["**/*.txt".to_string()],
            &["**/secret.txt".to_string()],
        )
        .unwrap();
        assert_eq!(
            ieg.decide_str("dir/secret.txt"),
            MatchDecision::DeniedByExclude
        );
        assert_eq!(
            ieg.decide_str("dir/ok.txt"),
            MatchDecision::Allowed
        );
    }

    #[test]
    fn missing_include_denies() {
        let ieg = IncludeExcludeGlobs::new(&["**/*.yaml".to_string()], &[]).unwrap();
        assert_eq!(
            ieg.decide_path(Path::new("dir/a.txt")),
            MatchDecision::DeniedByMissingInclude
        );
    }

    #[test]
    fn doublestar_pattern_matches_nested_paths() {
        let ieg = IncludeExcludeGlobs::new(&["**/*.rs".to_string()], &[]).unwrap();
        assert_eq!(
            ieg.decide_str("a/b/c/main.rs"),
            MatchDecision::Allowed
        );
    }
}
