//! The `polyester` binary: a declarative configuration applier driven by
//! shell-authored manifests. See `polyester --help` for the command
//! surface; `polyester <op-name>` and `polyester exec <op-name>` are hidden
//! plumbing commands the compiler's re-exec path uses, not meant for
//! interactive use.

mod cli_args;
mod resolve;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use polyester_compiler::{Compiler, POLY_PLAN_ENV};
use polyester_config::Config;
use polyester_core::OperationRecord;
use polyester_manifest::Manifest;
use polyester_operators::OpContext;
use polyester_scheduler::SchedulerOpts;
use polyester_state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "polyester", version, about = "Declarative configuration applier")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a `polyester.toml` config file. Its settings are the lowest
    /// precedence layer: CLI flags override it, `POLYESTER_*` environment
    /// variables override both.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit debug-level logs.
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all but error-level logs.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile and validate every operator's arguments without executing
    /// anything.
    Check {
        plans: Vec<String>,
        /// Directory containing the manifest being compiled (default: cwd).
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
    },

    /// Compile the manifest and reconcile the host toward its declared
    /// state.
    Apply {
        plans: Vec<String>,
        /// Directory containing the manifest being applied (default: cwd).
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
        /// Host directory treated as `/` when reconciling state (default: `/`).
        #[arg(long)]
        dir_root: Option<PathBuf>,
        #[arg(long)]
        state_dir: Option<PathBuf>,
        #[arg(short = 'f', long)]
        plan_file: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },

    /// Hidden: in-process operator execution used while compiling a
    /// manifest script.
    #[command(hide = true)]
    Exec {
        op_name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Hidden: any other subcommand name is treated as an operator
    /// invocation, valid only while `$_POLY_PLAN` is set by the compiler.
    #[command(external_subcommand)]
    OperatorCall(Vec<String>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overlay = Config {
        verbose: cli.verbose.then_some(true),
        quiet: cli.quiet.then_some(true),
        ..Default::default()
    };
    let resolved = load_config(cli.config.as_deref(), overlay)?;
    init_tracing(resolved.verbose, resolved.quiet);

    let result = match cli.command {
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
        Some(Commands::Check { plans, manifest_dir }) => {
            let manifest_dir = manifest_dir.unwrap_or(resolved.manifest_dir.clone());
            cmd_check(&manifest_dir, &plans)
        }
        Some(Commands::Apply {
            plans,
            manifest_dir,
            dir_root,
            state_dir,
            plan_file,
            dry_run,
            force,
        }) => {
            let manifest_dir = manifest_dir.unwrap_or(resolved.manifest_dir.clone());
            let dir_root = dir_root.unwrap_or(resolved.dir_root.clone());
            let state_dir = state_dir.unwrap_or(resolved.state_dir.clone());
            let plan_file = plan_file.or(resolved.plan_file.clone());
            cmd_apply(
                &manifest_dir,
                &dir_root,
                &state_dir,
                plan_file.as_deref(),
                &plans,
                dry_run,
                force,
                resolved.concurrency,
            )
            .await
        }
        Some(Commands::Exec { op_name, args }) => cmd_exec(&op_name, &args),
        Some(Commands::OperatorCall(tokens)) => cmd_operator_call(&tokens),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

/// Loads `polyester.toml` (if `config_path` is given), merges the CLI-flag
/// overlay on top, then applies `POLYESTER_*` environment overrides, and
/// fills in defaults. See [`polyester_config::Config`] for precedence.
fn load_config(config_path: Option<&Path>, overlay: Config) -> Result<polyester_config::ResolvedConfig> {
    let base = match config_path {
        Some(path) => Config::load_file(path).with_context(|| format!("loading config file {path:?}"))?,
        None => Config::default(),
    };
    let merged = base.merge(overlay).with_env_overrides();
    polyester_config::validate(&merged)?;
    Ok(merged.resolved())
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// `polyester <op-name> [args...]`: only valid mid-compilation, when the
/// compiler has set `$_POLY_PLAN` to the record file it wants this
/// invocation to append to instead of actually performing the operator's
/// side effect.
fn cmd_operator_call(tokens: &[String]) -> Result<()> {
    let Some((op_name, args)) = tokens.split_first() else {
        bail!("missing operator name");
    };
    let plan_path = std::env::var_os(POLY_PLAN_ENV).context(
        "this command is only valid while compiling a manifest (expected $_POLY_PLAN to be set)",
    )?;
    if plan_path == "-" {
        bail!("fd-3 plan channel (_POLY_PLAN=-) is not supported by this port; use an absolute path");
    }
    let args_value = cli_args::parse(op_name, args)?;
    let record = OperationRecord::new(op_name.clone(), args_value);
    polyester_compiler::emit_record(Path::new(&plan_path), &record)?;
    Ok(())
}

/// `polyester exec <op-name> [args...]`: parses and shape-validates an
/// operator invocation without performing its side effect. Every
/// `exec`-routed operator call is a deliberate no-op — it exists so a
/// manifest script can probe whether a `polyester <op>` call would parse,
/// during compilation, without the side effect actually running twice.
fn cmd_exec(op_name: &str, args: &[String]) -> Result<()> {
    let args_value = cli_args::parse(op_name, args)?;
    let record = OperationRecord::new(op_name, args_value);
    polyester_operators::validate(&record)?;
    Ok(())
}

fn cmd_check(manifest_dir: &Path, plan_names: &[String]) -> Result<()> {
    let manifest = Manifest::load_dir(manifest_dir).with_context(|| format!("loading manifest at {manifest_dir:?}"))?;
    let compiler = Compiler::new().context("locating the polyester executable")?;
    let plans = resolve::compile_manifest(&compiler, &manifest)?;
    let plans = resolve::filter_plans(plans, plan_names);
    for plan in &plans {
        println!("{}", plan.text_summary());
    }
    println!("{} plan(s) compiled and validated", plans.len());
    Ok(())
}

async fn cmd_apply(
    manifest_dir: &Path,
    dir_root: &Path,
    state_dir: &Path,
    plan_file: Option<&Path>,
    plan_names: &[String],
    dry_run: bool,
    force: bool,
    concurrency: usize,
) -> Result<()> {
    let workdir = tempfile::tempdir().context("creating a staging directory for manifest assets")?;

    let plans = match plan_file {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading plan file {path:?}"))?;
            serde_json::from_str(&json).with_context(|| format!("parsing plan file {path:?}"))?
        }
        None => {
            let manifest =
                Manifest::load_dir(manifest_dir).with_context(|| format!("loading manifest at {manifest_dir:?}"))?;
            manifest.save_dir(workdir.path()).context("materialising manifest assets")?;
            let compiler = Compiler::new().context("locating the polyester executable")?;
            resolve::compile_manifest(&compiler, &manifest)?
        }
    };
    let restricted = !plan_names.is_empty();
    let plans = resolve::filter_plans(plans, plan_names);

    let slug = manifest_slug(manifest_dir);
    let store_root = state_dir.join(slug);
    let store = Arc::new(StateStore::new(&store_root));
    let ctx = Arc::new(OpContext {
        dry_run,
        ..OpContext::new(dir_root, workdir.path())
    });

    let active_keys: std::collections::HashSet<String> = plans
        .iter()
        .flat_map(|p| p.real_ops())
        .filter_map(|op| op.cache_key().ok())
        .collect();

    let opts = SchedulerOpts {
        concurrency,
        force,
        dry_run,
    };

    let result = polyester_scheduler::run(plans, ctx, Arc::clone(&store), opts, CancellationToken::new()).await;
    print!("{}", result.text_summary());
    print!("{}", result.state_changes_report());

    if !dry_run && !restricted && !result.any_failed() {
        let removed = store.prune(&active_keys).context("pruning stale state entries")?;
        if removed > 0 {
            tracing::info!(removed, "pruned stale state entries");
        }
        store.write_checksum(&active_keys).context("writing state store checksum")?;
    }

    if result.any_failed() {
        bail!("apply finished with {} failed operation(s)", result.failed_count());
    }
    Ok(())
}

/// The manifest's absolute path with path separators replaced by `-` and
/// leading/trailing `-` trimmed, used to namespace the state store per
/// manifest so two manifests never collide on cache keys.
fn manifest_slug(manifest_dir: &Path) -> String {
    let abs = manifest_dir
        .canonicalize()
        .unwrap_or_else(|_| manifest_dir.to_path_buf());
    let raw = abs.to_string_lossy().replace(['/', '\\'], "-");
    raw.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_slug_strips_separators_and_trims_dashes() {
        let slug = manifest_slug(Path::new("/srv/manifests/app"));
        assert!(!slug.starts_with('-'));
        assert!(!slug.ends_with('-'));
        assert!(!slug.contains('/'));
    }
}
