//! The file-manipulation operators: `touch`, `mkdir`, `copy`, `pcopy`, and
//! `atomic-copy`.

use crate::operator::{OpContext, OpError, Operator, Validate};
use crate::snapshot::{sha256_bytes, snapshot};
use polyester_core::{State, StateEntry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchOpts {
    pub path: String,
    #[serde(default)]
    pub mode: Option<u32>,
}

pub struct Touch(pub TouchOpts);

impl Operator for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let path = ctx.host.abs(&self.0.path);
        Ok(State::new().append(snapshot(&path)?.map(|s| StateEntry::target(self.0.path.clone(), s))))
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let path = ctx.host.abs(&self.0.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(&path, [])?;
        } else {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(std::time::SystemTime::now())?;
        }
        if let Some(mode) = self.0.mode {
            set_mode(&path, mode)?;
        }
        self.get_state(ctx)
    }
}

impl Validate for Touch {
    fn validate(&self) -> Result<(), OpError> {
        if self.0.path.is_empty() {
            return Err(OpError::User("touch: path must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkdirOpts {
    pub path: String,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub parents: bool,
}

pub struct Mkdir(pub MkdirOpts);

impl Operator for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let path = ctx.host.abs(&self.0.path);
        Ok(State::new().append(
            snapshot(&path)?
                .map(|s| s.without_timestamps())
                .map(|s| StateEntry::target(self.0.path.clone(), s)),
        ))
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let path = ctx.host.abs(&self.0.path);
        if self.0.parents {
            std::fs::create_dir_all(&path)?;
        } else {
            match std::fs::create_dir(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(mode) = self.0.mode {
            set_mode(&path, mode)?;
        }
        self.get_state(ctx)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyOpts {
    pub sources: Vec<String>,
    pub dest: String,
    #[serde(default)]
    pub mode: Option<u32>,
}

pub struct Copy(pub CopyOpts);

fn resolved_sources(ctx: &OpContext, patterns: &[String]) -> Result<Vec<(String, PathBuf)>, OpError> {
    let mut out = Vec::new();
    for pattern in patterns {
        let matches = ctx.plandir.resolve(polyester_fs::AssetKind::Files, pattern)?;
        for rel in matches {
            let abs = ctx.plandir.join(&["files", &rel.to_string_lossy()]);
            out.push((rel.to_string_lossy().to_string(), abs));
        }
    }
    out.sort();
    Ok(out)
}

impl Operator for Copy {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let mut state = State::new();
        for (rel, src) in resolved_sources(ctx, &self.0.sources)? {
            if let Some(snap) = snapshot(&src)? {
                state = state.append([StateEntry::source(format!("src:{rel}"), snap)]);
            }
        }
        let dest = ctx.host.abs(&self.0.dest);
        if let Some(snap) = snapshot(&dest)? {
            state = state.append([StateEntry::target(self.0.dest.clone(), snap)]);
        }
        Ok(state)
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let sources = resolved_sources(ctx, &self.0.sources)?;
        let dest = ctx.host.abs(&self.0.dest);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if sources.len() == 1 && !dest_is_dir_target(&self.0.dest) {
            std::fs::copy(&sources[0].1, &dest)?;
        } else {
            std::fs::create_dir_all(&dest)?;
            for (rel, src) in &sources {
                let out = dest.join(rel);
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(src, &out)?;
            }
        }

        if let Some(mode) = self.0.mode {
            set_mode(&dest, mode)?;
        }
        self.get_state(ctx)
    }
}

fn dest_is_dir_target(dest: &str) -> bool {
    dest.ends_with('/')
}

/// `pcopy`: like `copy`, but renders each source through the template
/// engine before writing it out ("processed copy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcopyOpts {
    pub sources: Vec<String>,
    pub dest: String,
    #[serde(default)]
    pub mode: Option<u32>,
}

pub struct Pcopy(pub PcopyOpts);

impl Operator for Pcopy {
    fn name(&self) -> &'static str {
        "pcopy"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let mut state = State::new();
        for (rel, src) in resolved_sources(ctx, &self.0.sources)? {
            if let Some(snap) = snapshot(&src)? {
                state = state.append([StateEntry::source(format!("src:{rel}"), snap)]);
            }
        }
        let dest = ctx.host.abs(&self.0.dest);
        if let Some(snap) = snapshot(&dest)? {
            state = state.append([StateEntry::target(self.0.dest.clone(), snap)]);
        }
        Ok(state)
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let sources = resolved_sources(ctx, &self.0.sources)?;
        let dest = ctx.host.abs(&self.0.dest);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = polyester_template::DataBundle::new();
        if sources.len() == 1 && !dest_is_dir_target(&self.0.dest) {
            let contents = std::fs::read_to_string(&sources[0].1)?;
            let rendered = ctx.template.render_str(&contents, &data)?;
            std::fs::write(&dest, rendered)?;
        } else {
            std::fs::create_dir_all(&dest)?;
            for (rel, src) in &sources {
                let out = dest.join(rel);
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let contents = std::fs::read_to_string(src)?;
                let rendered = ctx.template.render_str(&contents, &data)?;
                std::fs::write(&out, rendered)?;
            }
        }

        if let Some(mode) = self.0.mode {
            set_mode(&dest, mode)?;
        }
        self.get_state(ctx)
    }
}

/// `atomic-copy`: writes to a sibling temp file then renames into place, so
/// a reader of `dest` never observes a partially written file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicCopyOpts {
    pub source: String,
    pub dest: String,
    #[serde(default)]
    pub mode: Option<u32>,
}

pub struct AtomicCopy(pub AtomicCopyOpts);

impl Operator for AtomicCopy {
    fn name(&self) -> &'static str {
        "atomic-copy"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let mut state = State::new();
        let matches = ctx.plandir.resolve(polyester_fs::AssetKind::Files, &self.0.source)?;
        if let Some(rel) = matches.first() {
            let src = ctx.plandir.join(&["files", &rel.to_string_lossy()]);
            if let Some(snap) = snapshot(&src)? {
                state = state.append([StateEntry::source("src", snap)]);
            }
        }
        let dest = ctx.host.abs(&self.0.dest);
        if let Some(snap) = snapshot(&dest)? {
            state = state.append([StateEntry::target(self.0.dest.clone(), snap)]);
        }
        Ok(state)
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let matches = ctx.plandir.resolve(polyester_fs::AssetKind::Files, &self.0.source)?;
        let rel = matches
            .first()
            .ok_or_else(|| OpError::User(format!("atomic-copy: no source matched {:?}", self.0.source)))?;
        let src = ctx.plandir.join(&["files", &rel.to_string_lossy()]);
        let dest = ctx.host.abs(&self.0.dest);

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let tmp = parent.join(format!(".{}.tmp", dest.file_name().and_then(|n| n.to_str()).unwrap_or("atomic-copy")));
        std::fs::copy(&src, &tmp)?;
        if let Some(mode) = self.0.mode {
            set_mode(&tmp, mode)?;
        }
        std::fs::rename(&tmp, &dest)?;

        self.get_state(ctx)
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    sha256_bytes(bytes)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
