//! The `shell` operator: runs a script with `sh -c` on every apply. It has
//! no state of its own — it's an escape hatch for steps the built-in
//! operators can't express, so convergence is the script author's
//! responsibility, not this operator's.

use crate::operator::{OpContext, OpError, Operator, Validate};
use polyester_core::{State, StateEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellOpts {
    pub script: String,
    #[serde(default)]
    pub dir: Option<String>,
}

pub struct Shell(pub ShellOpts);

impl Operator for Shell {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        let mut kv = BTreeMap::new();
        kv.insert("script_sha256".to_string(), serde_json::json!(crate::snapshot::sha256_bytes(self.0.script.as_bytes())));
        Ok(State::new().append([StateEntry::kv("shell", kv)]))
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.0.script);
        if let Some(dir) = &self.0.dir {
            cmd.current_dir(ctx.host.abs(dir));
        }
        let status = cmd.status()?;
        if !status.success() {
            return Err(OpError::System(format!("shell: script exited with {status}")));
        }
        self.get_state(ctx)
    }
}

impl Validate for Shell {
    fn validate(&self) -> Result<(), OpError> {
        if self.0.script.trim().is_empty() {
            return Err(OpError::User("shell: script must not be empty".into()));
        }
        Ok(())
    }
}
