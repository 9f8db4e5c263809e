//! The built-in operator registry: every operator polyester ships with,
//! plus the factory that turns a decoded [`OperationRecord`] into a live
//! `Box<dyn Operator>`.

pub mod fileop;
pub mod gitop;
pub mod markers;
pub mod noop;
pub mod operator;
pub mod pkgop;
pub mod shellop;
pub mod snapshot;
pub mod templateop;
pub mod userop;

pub use operator::{DesiredState, OpContext, OpError, Operator, Validate};

use polyester_core::OperationRecord;

/// Builds the operator named by `record.name`, decoding `record.args` into
/// that operator's argument struct. Mirrors the upstream compiler's
/// marshal/unmarshal round trip through a generic argument value — this is
/// the one place in the workspace that needs to know every operator's
/// argument shape.
pub fn build(record: &OperationRecord) -> Result<Box<dyn Operator>, OpError> {
    macro_rules! decode {
        ($ty:ty) => {
            serde_json::from_value::<$ty>(record.args.clone()).map_err(OpError::from)?
        };
    }

    Ok(match record.name.as_str() {
        "noop" => Box::new(noop::Noop),
        "plan" => Box::new(markers::PlanMarker),
        "dependency" => Box::new(markers::DependencyMarker),
        "touch" => Box::new(fileop::Touch(decode!(fileop::TouchOpts))),
        "mkdir" => Box::new(fileop::Mkdir(decode!(fileop::MkdirOpts))),
        "copy" => Box::new(fileop::Copy(decode!(fileop::CopyOpts))),
        "pcopy" => Box::new(fileop::Pcopy(decode!(fileop::PcopyOpts))),
        "atomic-copy" => Box::new(fileop::AtomicCopy(decode!(fileop::AtomicCopyOpts))),
        "git-repo" => Box::new(gitop::Repo(decode!(gitop::RepoOpts))),
        "shell" => Box::new(shellop::Shell(decode!(shellop::ShellOpts))),
        "useradd" => Box::new(userop::Useradd(decode!(userop::UseraddOpts))),
        "apt-install" => Box::new(pkgop::AptInstall(decode!(pkgop::AptInstallOpts))),
        "template" => Box::new(templateop::Template(decode!(templateop::TemplateOpts))),
        other => return Err(OpError::User(format!("unknown operator {other:?}"))),
    })
}

/// Runs the named operator's `Validate` capability, if it has one, over
/// `record.args`. Operators without a `Validate` impl (most of them —
/// there's nothing to check beyond what serde's own deserialization of the
/// argument struct already enforces) are trivially valid.
pub fn validate(record: &OperationRecord) -> Result<(), OpError> {
    macro_rules! decode {
        ($ty:ty) => {
            serde_json::from_value::<$ty>(record.args.clone())?
        };
    }

    match record.name.as_str() {
        "touch" => fileop::Touch(decode!(fileop::TouchOpts)).validate(),
        "shell" => shellop::Shell(decode!(shellop::ShellOpts)).validate(),
        _ => {
            // Constructing validates the argument shape via serde even when
            // the operator has no further invariants of its own to check.
            build(record).map(|_| ())
        }
    }
}

/// Every operator name the registry knows how to build, in the order
/// `polyester operators list` reports them.
pub const OPERATOR_NAMES: &[&str] = &[
    "noop",
    "plan",
    "dependency",
    "touch",
    "mkdir",
    "copy",
    "pcopy",
    "atomic-copy",
    "git-repo",
    "shell",
    "useradd",
    "apt-install",
    "template",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_registered_operator_name() {
        for name in OPERATOR_NAMES {
            let record = OperationRecord::new(*name, default_args(name));
            let op = build(&record).unwrap();
            assert_eq!(op.name(), *name);
        }
    }

    fn default_args(name: &str) -> serde_json::Value {
        match name {
            "touch" | "mkdir" => serde_json::json!({"path": "x"}),
            "copy" | "pcopy" => serde_json::json!({"sources": ["x"], "dest": "y"}),
            "atomic-copy" => serde_json::json!({"source": "x", "dest": "y"}),
            "git-repo" => serde_json::json!({"url": "x", "dir": "y"}),
            "shell" => serde_json::json!({"script": "true"}),
            "useradd" => serde_json::json!({"name": "x"}),
            "apt-install" => serde_json::json!({"packages": []}),
            "template" => serde_json::json!({"path": "x", "dests": ["y"]}),
            _ => serde_json::json!({}),
        }
    }

    #[test]
    fn unknown_operator_name_is_rejected() {
        let record = OperationRecord::new("does-not-exist", serde_json::json!({}));
        assert!(build(&record).is_err());
    }
}
