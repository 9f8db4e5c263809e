//! Per-operator argument parsing: turns the token vector a manifest script
//! passes to `polyester <op-name> [args...]` into the JSON argument object
//! the operator's `Opts` struct deserializes from. Mirrors the flag
//! grammar of each upstream operator's cobra command.

use clap::{Arg, ArgAction, Command};
use polyester_error::{Categorized, ErrorCategory};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    #[error("{0}")]
    Usage(#[from] clap::Error),
}

impl Categorized for ArgsError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::User
    }
}

/// Parses `tokens` (argv, without the operator name itself) into the JSON
/// args object `polyester_operators::build` expects for `op_name`.
pub fn parse(op_name: &str, tokens: &[String]) -> Result<Value, ArgsError> {
    match op_name {
        "touch" => parse_mode_path(op_name, tokens, false),
        "mkdir" => parse_mkdir(tokens),
        "copy" => parse_copy(op_name, "copy", tokens),
        "pcopy" => parse_copy(op_name, "pcopy", tokens),
        "atomic-copy" => parse_atomic_copy(tokens),
        "git-repo" => parse_git_repo(tokens),
        "useradd" => parse_useradd(tokens),
        "apt-install" => parse_apt_install(tokens),
        "sh" | "shell" => parse_shell(tokens),
        "template" => parse_template(tokens),
        "noop" => Ok(json!({})),
        "plan" => Ok(json!({ "plans": tokens })),
        "dependency" => Ok(json!({ "plans": tokens })),
        other => Err(ArgsError::UnknownOperator(other.to_string())),
    }
}

fn base_command(name: &'static str) -> Command {
    Command::new(name).no_binary_name(true).disable_help_flag(true)
}

fn parse_mode_path(name: &'static str, tokens: &[String], parents: bool) -> Result<Value, ArgsError> {
    let mut cmd = base_command(name)
        .arg(Arg::new("path").required(true))
        .arg(Arg::new("mode").short('m').long("mode"));
    if parents {
        cmd = cmd.arg(Arg::new("parents").short('p').long("parents").action(ArgAction::SetTrue));
    }
    let m = cmd.try_get_matches_from(tokens)?;
    let mut out = json!({ "path": m.get_one::<String>("path") });
    if let Some(mode) = m.get_one::<String>("mode") {
        out["mode"] = json!(parse_octal_mode(mode));
    }
    if parents {
        out["parents"] = json!(m.get_flag("parents"));
    }
    Ok(out)
}

fn parse_mkdir(tokens: &[String]) -> Result<Value, ArgsError> {
    parse_mode_path("mkdir", tokens, true)
}

fn parse_copy(record_name: &str, cmd_name: &'static str, tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command(cmd_name)
        .arg(Arg::new("paths").num_args(1..).required(true))
        .arg(Arg::new("mode").short('m').long("mode"))
        .arg(Arg::new("exclude").long("exclude").action(ArgAction::Append))
        .try_get_matches_from(tokens)?;
    let mut paths: Vec<String> = m.get_many::<String>("paths").unwrap().cloned().collect();
    let dest = paths.pop().ok_or_else(|| {
        ArgsError::Usage(clap::Error::raw(
            clap::error::ErrorKind::TooFewValues,
            format!("{record_name}: requires at least one source and a destination"),
        ))
    })?;
    let mut out = json!({ "sources": paths, "dest": dest });
    if let Some(mode) = m.get_one::<String>("mode") {
        out["mode"] = json!(parse_octal_mode(mode));
    }
    if let Some(exclude) = m.get_many::<String>("exclude") {
        out["exclude"] = json!(exclude.cloned().collect::<Vec<_>>());
    }
    Ok(out)
}

fn parse_atomic_copy(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("atomic-copy")
        .arg(Arg::new("source").required(true))
        .arg(Arg::new("dest").required(true))
        .arg(Arg::new("mode").short('m').long("mode"))
        .try_get_matches_from(tokens)?;
    let mut out = json!({
        "source": m.get_one::<String>("source"),
        "dest": m.get_one::<String>("dest"),
    });
    if let Some(mode) = m.get_one::<String>("mode") {
        out["mode"] = json!(parse_octal_mode(mode));
    }
    Ok(out)
}

fn parse_git_repo(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("git-repo")
        .arg(Arg::new("url").required(true))
        .arg(Arg::new("dest").required(true))
        .arg(Arg::new("ref").long("ref"))
        .arg(Arg::new("version").long("version"))
        .try_get_matches_from(tokens)?;
    Ok(json!({
        "url": m.get_one::<String>("url"),
        "dir": m.get_one::<String>("dest"),
        "ref": m.get_one::<String>("ref").cloned().unwrap_or_default(),
        "version": m.get_one::<String>("version").cloned().unwrap_or_default(),
    }))
}

fn parse_useradd(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("useradd")
        .arg(Arg::new("name").required(true))
        .arg(Arg::new("shell").short('s').long("shell"))
        .arg(Arg::new("home").long("home"))
        .arg(Arg::new("create-home").short('m').long("create-home").action(ArgAction::SetTrue))
        .try_get_matches_from(tokens)?;
    // `-m`/`--create-home` is upstream's request for a conventional home
    // directory; the operator picks the path itself when `home` is absent,
    // so the flag carries no argument of its own into the record.
    let mut out = json!({ "name": m.get_one::<String>("name") });
    if let Some(shell) = m.get_one::<String>("shell") {
        out["shell"] = json!(shell);
    }
    if let Some(home) = m.get_one::<String>("home") {
        out["home"] = json!(home);
    }
    Ok(out)
}

fn parse_apt_install(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("apt-install")
        .arg(Arg::new("packages").num_args(1..).required(true))
        .try_get_matches_from(tokens)?;
    let packages: Vec<String> = m.get_many::<String>("packages").unwrap().cloned().collect();
    Ok(json!({ "packages": packages }))
}

fn parse_shell(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("sh")
        .arg(Arg::new("script").required(true))
        .arg(Arg::new("dir").long("dir"))
        .try_get_matches_from(tokens)?;
    let mut out = json!({ "script": m.get_one::<String>("script") });
    if let Some(dir) = m.get_one::<String>("dir") {
        out["dir"] = json!(dir);
    }
    Ok(out)
}

fn parse_template(tokens: &[String]) -> Result<Value, ArgsError> {
    let m = base_command("template")
        .arg(Arg::new("template").required(true))
        .arg(Arg::new("dests").num_args(1..).required(true))
        .arg(Arg::new("data").short('d').long("data").action(ArgAction::Append))
        .try_get_matches_from(tokens)?;
    let mut out = json!({
        "path": m.get_one::<String>("template"),
        "dests": m.get_many::<String>("dests").unwrap().cloned().collect::<Vec<_>>(),
    });
    if let Some(data) = m.get_many::<String>("data") {
        out["data_paths"] = json!(data.cloned().collect::<Vec<_>>());
    }
    Ok(out)
}

/// Parses a file mode given either as a bare octal literal (`644`) or with
/// a leading `0`/`0o` (`0644`, `0o644`), matching the shell scripting
/// convention the original commands accept.
fn parse_octal_mode(raw: &str) -> u32 {
    let trimmed = raw.trim_start_matches("0o").trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    u32::from_str_radix(trimmed, 8).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn touch_parses_path_and_mode() {
        let args = parse("touch", &toks(&["/etc/foo", "-m", "644"])).unwrap();
        assert_eq!(args["path"], "/etc/foo");
        assert_eq!(args["mode"], 0o644);
    }

    #[test]
    fn copy_splits_sources_from_trailing_dest() {
        let args = parse("copy", &toks(&["a", "b", "/dest"])).unwrap();
        assert_eq!(args["sources"], json!(["a", "b"]));
        assert_eq!(args["dest"], "/dest");
    }

    #[test]
    fn git_repo_parses_ref_and_version_flags() {
        let args = parse("git-repo", &toks(&["https://example.test/repo.git", "/srv/repo", "--ref", "main"])).unwrap();
        assert_eq!(args["url"], "https://example.test/repo.git");
        assert_eq!(args["dir"], "/srv/repo");
        assert_eq!(args["ref"], "main");
    }

    #[test]
    fn plan_marker_collects_dependency_names() {
        let args = parse("dependency", &toks(&["db", "cache"])).unwrap();
        assert_eq!(args["plans"], json!(["db", "cache"]));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(parse("does-not-exist", &[]).is_err());
    }

    #[test]
    fn unknown_operator_categorizes_as_user_error() {
        let err = parse("does-not-exist", &[]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::User);
    }
}
