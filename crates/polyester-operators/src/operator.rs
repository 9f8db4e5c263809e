//! The operator trait family: every built-in operation (`touch`, `copy`,
//! `git-repo`, ...) implements `Operator`, optionally `Validate` and
//! `DesiredState` when those capabilities make sense for it.

use polyester_core::State;
use polyester_fs::{HostFs, RootedFs};
use polyester_template::{NullDecoder, SecretDecoder, TemplateEngine};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("{0}")]
    User(String),
    #[error("{0}")]
    System(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Fs(#[from] polyester_fs::FsError),
    #[error(transparent)]
    Template(#[from] polyester_template::TemplateError),
}

impl polyester_error::Categorized for OpError {
    fn category(&self) -> polyester_error::ErrorCategory {
        use polyester_error::ErrorCategory;
        match self {
            OpError::User(_) => ErrorCategory::User,
            OpError::System(_) | OpError::Io(_) | OpError::Fs(_) | OpError::Template(_) => ErrorCategory::System,
            OpError::Json(_) => ErrorCategory::Programmer,
        }
    }
}

/// Everything an operator needs to do its job: a filesystem rooted at the
/// machine being configured, a manifest-relative filesystem for reading
/// declared assets, and a template engine wired up with the current facts
/// and secrets.
pub struct OpContext {
    pub host: HostFs,
    pub plandir: polyester_fs::PlanDirFs,
    pub template: Arc<TemplateEngine>,
    pub secrets: Arc<dyn SecretDecoder>,
    pub dry_run: bool,
}

impl OpContext {
    pub fn new(host_root: impl Into<std::path::PathBuf>, plandir_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            host: HostFs::new(host_root),
            plandir: polyester_fs::PlanDirFs::new(plandir_root),
            template: Arc::new(TemplateEngine::new()),
            secrets: Arc::new(NullDecoder),
            dry_run: false,
        }
    }

    /// Builds a context identical to this one but rooted at a particular
    /// sub-plan for asset resolution — the template engine, secret
    /// decoder, and host root are shared (cheap `Arc`/`PathBuf` clones),
    /// only the plan-dir's active-subplan marker changes. Used by the
    /// scheduler so each plan's operators resolve `files/`/`templates/`
    /// against their own plan directory first.
    pub fn for_subplan(&self, subplan: Option<&str>) -> Self {
        let root = self.plandir.root().to_path_buf();
        Self {
            host: self.host.clone(),
            plandir: match subplan {
                Some(name) => polyester_fs::PlanDirFs::with_active_subplan(root, name),
                None => polyester_fs::PlanDirFs::new(root),
            },
            template: Arc::clone(&self.template),
            secrets: Arc::clone(&self.secrets),
            dry_run: self.dry_run,
        }
    }
}

/// The operator interface every built-in (and, eventually, plugin)
/// operator implements: `get_state` observes current reality without
/// changing it, `run` changes reality and returns the state afterward.
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;
    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError>;
    fn run(&self, ctx: &OpContext) -> Result<State, OpError>;

    /// Returns `self` as a [`DesiredState`] implementor, for operators that
    /// have one. The executor prefers this over comparing post-run
    /// `get_state` output when deciding dirtiness, since it can be computed
    /// without performing `run`'s side effect.
    fn as_desired_state(&self) -> Option<&dyn DesiredState> {
        None
    }
}

/// Operators whose arguments can be checked for basic well-formedness
/// before `get_state`/`run` ever touch the filesystem.
pub trait Validate: Operator {
    fn validate(&self) -> Result<(), OpError>;
}

/// Operators that can compute what state *would* result from `run` without
/// performing it — used by `polyester check` to report a would-be change
/// without making it.
pub trait DesiredState: Operator {
    fn desired_state(&self, ctx: &OpContext) -> Result<State, OpError>;
}
