//! Compiles a manifest's shell scripts into ordered [`OperationRecord`]
//! plans by actually running them: each script is rewritten for magic mode,
//! then executed under `sh -c` with `_POLY_PLAN` pointed at a temp file that
//! re-exec'd `polyester <op>` invocations append their decoded argument
//! record to instead of performing their side effect.

pub mod magic;

use polyester_core::OperationRecord;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Environment variable the compiler sets to tell a re-exec'd `polyester
/// <op>` invocation to record instead of run. Either an absolute path (this
/// port's only supported form) or `-` for fd 3 (unsupported here — see
/// DESIGN.md).
pub const POLY_PLAN_ENV: &str = "_POLY_PLAN";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("script exited with {0}")]
    ScriptFailed(std::process::ExitStatus),
    #[error("failed to decode operation record: {0}")]
    Decode(serde_json::Error),
    #[error("operator {0:?} failed validation: {1}")]
    Validate(String, polyester_operators::OpError),
}

impl polyester_error::Categorized for CompileError {
    fn category(&self) -> polyester_error::ErrorCategory {
        use polyester_error::{Categorized, ErrorCategory};
        match self {
            CompileError::Io(_) => ErrorCategory::System,
            CompileError::ScriptFailed(_) => ErrorCategory::User,
            CompileError::Decode(_) => ErrorCategory::Programmer,
            CompileError::Validate(_, e) => e.category(),
        }
    }
}

/// Appends one operation record to the plan file named by `$_POLY_PLAN`,
/// the write side of the compiler's IPC channel. Called by the CLI's
/// hidden `polyester <op>` re-exec path, not by manifest authors directly.
pub fn emit_record(plan_path: &Path, record: &OperationRecord) -> std::io::Result<()> {
    use std::io::Write;
    let json = serde_json::to_string(record)?;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(plan_path)?;
    writeln!(file, "{json}\n---")?;
    Ok(())
}

/// Compiles one manifest script (the root `polyester.sh`, or one
/// `plans/*.sh`) into its ordered operation records.
pub struct Compiler {
    self_exe: PathBuf,
}

impl Compiler {
    /// Uses the currently running executable as the `polyester`/`P` target
    /// re-exec'd operator calls resolve to.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            self_exe: std::env::current_exe()?,
        })
    }

    /// Overrides the re-exec target, used by tests to point `polyester`/`P`
    /// calls at a stub binary instead of the real CLI.
    pub fn with_self_exe(self_exe: impl Into<PathBuf>) -> Self {
        Self {
            self_exe: self_exe.into(),
        }
    }

    pub fn compile(&self, plan_name: &str, script: &str) -> Result<Vec<OperationRecord>, CompileError> {
        let rewritten = magic::rewrite_magic_mode(script);
        let prelude = format!("P() {{ \"{}\" \"$@\"; }}\n", self.self_exe.display());
        let full_script = format!("{prelude}{rewritten}");

        let plan_file = tempfile::NamedTempFile::new()?;
        let plan_path = plan_file.path().to_path_buf();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&full_script);
        cmd.env(POLY_PLAN_ENV, &plan_path);
        decorate_path(&mut cmd, &self.self_exe);

        tracing::debug!(plan = plan_name, "compiling plan script");
        let status = cmd.status()?;
        if !status.success() {
            return Err(CompileError::ScriptFailed(status));
        }

        let contents = std::fs::read_to_string(&plan_path).unwrap_or_default();
        let records = parse_records(&contents, plan_name)?;
        validate_records(&records)?;
        Ok(records)
    }
}

/// Runs each operator's `Validate` hook (when it implements one) over its
/// decoded arguments, catching malformed operator arguments without
/// needing to actually execute anything.
fn validate_records(records: &[OperationRecord]) -> Result<(), CompileError> {
    for record in records {
        if record.is_marker() {
            continue;
        }
        polyester_operators::validate(record).map_err(|e| CompileError::Validate(record.name.clone(), e))?;
    }
    Ok(())
}

fn decorate_path(cmd: &mut Command, self_exe: &Path) {
    let dir = self_exe.parent().unwrap_or_else(|| Path::new("."));
    let existing = std::env::var_os("PATH").unwrap_or_default();
    let mut new_path = OsString::from(dir);
    new_path.push(":");
    new_path.push(existing);
    cmd.env("PATH", new_path);
}

fn parse_records(contents: &str, plan_name: &str) -> Result<Vec<OperationRecord>, CompileError> {
    contents
        .split("\n---\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let record: OperationRecord = serde_json::from_str(chunk).map_err(CompileError::Decode)?;
            Ok(record.with_plan(plan_name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_record_appends_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan");
        let rec = OperationRecord::new("touch", serde_json::json!({"path": "/a"}));
        emit_record(&plan_path, &rec).unwrap();
        emit_record(&plan_path, &rec).unwrap();

        let contents = std::fs::read_to_string(&plan_path).unwrap();
        let parsed = parse_records(&contents, "main").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "touch");
        assert_eq!(parsed[0].plan, "main");
    }

    #[test]
    fn compile_runs_script_and_reads_back_records() {
        let compiler = Compiler::new().unwrap();
        // This script never invokes `polyester`/`P`, so it compiles to an
        // empty plan without needing a real operator re-exec target.
        let records = compiler.compile("main", "true\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn compile_propagates_nonzero_exit() {
        let compiler = Compiler::new().unwrap();
        let err = compiler.compile("main", "exit 3\n").unwrap_err();
        assert!(matches!(err, CompileError::ScriptFailed(_)));
    }
}
