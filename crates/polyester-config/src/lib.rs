//! Runtime configuration: a `ConfigFile` loaded from TOML, merged over CLI
//! flags, merged over environment variables — lowest to highest precedence.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },
    #[error("failed to parse config: {reason}")]
    ParseError { reason: String },
    #[error("config validation failed: {reasons:?}")]
    ValidationError { reasons: Vec<String> },
}

impl polyester_error::Categorized for ConfigError {
    fn category(&self) -> polyester_error::ErrorCategory {
        polyester_error::ErrorCategory::User
    }
}

/// Runtime settings for the `polyester` binary. Every field is optional at
/// the file/env layer so each layer can leave a setting untouched for the
/// next one to supply; [`Config::resolved`] fills in the remaining
/// defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Config {
    /// Host directory `apply`/`check` treat as `/` when reconciling state —
    /// distinct from `manifest_dir`, which only locates the manifest being
    /// read. Mirrors the original's `--dir-root` flag, default `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_root: Option<String>,

    /// Directory containing the manifest (the `main.sh`/root script and its
    /// `files/templates/vars/secrets` siblings). Defaults to the current
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<String>,

    /// Directory state snapshots are persisted under, keyed by manifest
    /// checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// When set, the compiled plan is additionally written here as JSON
    /// (debugging aid, mirrors the original's `-plan-file` flag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_file: Option<String>,

    /// Number of plans to run concurrently. `None` means "available
    /// parallelism" (resolved at apply time, not at config-load time, so
    /// the same config file behaves correctly on machines with different
    /// core counts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet: Option<bool>,
}

/// [`Config`] with every field defaulted, ready to drive an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub dir_root: PathBuf,
    pub manifest_dir: PathBuf,
    pub state_dir: PathBuf,
    pub plan_file: Option<PathBuf>,
    pub concurrency: usize,
    pub verbose: bool,
    pub quiet: bool,
}

const DEFAULT_STATE_DIR: &str = "/var/lib/polyester/state";

impl Config {
    /// Parses a TOML config file. Environment overrides are not applied
    /// here; call [`Config::with_env_overrides`] afterward.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Merges `overlay` on top of `self`; fields set in `overlay` win.
    pub fn merge(self, overlay: Config) -> Config {
        Config {
            dir_root: overlay.dir_root.or(self.dir_root),
            manifest_dir: overlay.manifest_dir.or(self.manifest_dir),
            state_dir: overlay.state_dir.or(self.state_dir),
            plan_file: overlay.plan_file.or(self.plan_file),
            concurrency: overlay.concurrency.or(self.concurrency),
            verbose: overlay.verbose.or(self.verbose),
            quiet: overlay.quiet.or(self.quiet),
        }
    }

    /// Applies the recognised `POLYESTER_*` environment variables on top
    /// of `self`, at the highest precedence.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("POLYESTER_DIR_ROOT") {
            self.dir_root = Some(v);
        }
        if let Ok(v) = std::env::var("POLYESTER_MANIFEST_DIR") {
            self.manifest_dir = Some(v);
        }
        if let Ok(v) = std::env::var("POLYESTER_STATE_DIR") {
            self.state_dir = Some(v);
        }
        if let Ok(v) = std::env::var("POLYESTER_PLAN_FILE") {
            self.plan_file = Some(v);
        }
        if let Ok(v) = std::env::var("POLYESTER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.concurrency = Some(n);
            }
        }
        self
    }

    /// Fills in defaults for every unset field.
    pub fn resolved(&self) -> ResolvedConfig {
        ResolvedConfig {
            dir_root: self.dir_root.as_deref().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/")),
            manifest_dir: self.manifest_dir.as_deref().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            state_dir: self
                .state_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            plan_file: self.plan_file.as_deref().map(PathBuf::from),
            concurrency: self.concurrency.unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
            }),
            verbose: self.verbose.unwrap_or(false),
            quiet: self.quiet.unwrap_or(false),
        }
    }
}

/// Validates a config for internally inconsistent settings (e.g. both
/// `verbose` and `quiet`). Does not touch the filesystem.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    if config.verbose == Some(true) && config.quiet == Some(true) {
        errors.push("verbose and quiet cannot both be set".to_string());
    }
    if let Some(0) = config.concurrency {
        errors.push("concurrency must be at least 1".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}
