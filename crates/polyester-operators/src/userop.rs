//! The `useradd` operator: ensures a local user account exists with the
//! declared shell/home/uid, diffing against `/etc/passwd` and converging
//! with `useradd`/`usermod` rather than assuming a fresh system every time.

use crate::operator::{OpContext, OpError, Operator};
use polyester_core::{State, StateEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseraddOpts {
    pub name: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
}

pub struct Useradd(pub UseraddOpts);

/// One `/etc/passwd` row, parsed directly rather than through an `nss`
/// binding — the operator only ever needs the handful of fields
/// `useradd`/`usermod` also accept as flags.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PasswdEntry {
    name: String,
    uid: u32,
    home: String,
    shell: String,
}

impl PasswdEntry {
    fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut m = BTreeMap::new();
        m.insert("name".to_string(), serde_json::json!(self.name));
        m.insert("uid".to_string(), serde_json::json!(self.uid));
        m.insert("home".to_string(), serde_json::json!(self.home));
        m.insert("shell".to_string(), serde_json::json!(self.shell));
        m
    }
}

fn lookup_passwd(path: &str, username: &str) -> std::io::Result<Option<PasswdEntry>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    for line in contents.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 || fields[0] != username {
            continue;
        }
        return Ok(Some(PasswdEntry {
            name: fields[0].to_string(),
            uid: fields[2].parse().unwrap_or(0),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        }));
    }
    Ok(None)
}

const PASSWD_PATH: &str = "/etc/passwd";

impl Operator for Useradd {
    fn name(&self) -> &'static str {
        "useradd"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        let entry = lookup_passwd(PASSWD_PATH, &self.0.name)?;
        match entry {
            Some(entry) => {
                let mut se = StateEntry::kv(self.0.name.clone(), entry.to_map());
                se.target = true;
                Ok(State::new().append([se]))
            }
            None => Ok(State::new()),
        }
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let existing = lookup_passwd(PASSWD_PATH, &self.0.name)?;

        let mut cmd = Command::new(if existing.is_some() { "usermod" } else { "useradd" });
        if let Some(shell) = &self.0.shell {
            cmd.arg("--shell").arg(shell);
        }
        if let Some(home) = &self.0.home {
            cmd.arg("--home").arg(home);
            if existing.is_none() {
                cmd.arg("--create-home");
            }
        }
        if let Some(uid) = self.0.uid {
            cmd.arg("--uid").arg(uid.to_string());
        }
        cmd.arg(&self.0.name);

        let status = cmd.status()?;
        if !status.success() {
            return Err(OpError::System(format!("useradd/usermod for {:?} exited with {status}", self.0.name)));
        }

        self.get_state(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn lookup_parses_matching_row() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "root:x:0:0:root:/root:/bin/bash").unwrap();
        writeln!(f, "deploy:x:1001:1001:Deploy:/home/deploy:/bin/sh").unwrap();
        let entry = lookup_passwd(f.path().to_str().unwrap(), "deploy").unwrap().unwrap();
        assert_eq!(entry.uid, 1001);
        assert_eq!(entry.shell, "/bin/sh");
    }

    #[test]
    fn lookup_missing_user_is_none() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "root:x:0:0:root:/root:/bin/bash").unwrap();
        assert!(lookup_passwd(f.path().to_str().unwrap(), "ghost").unwrap().is_none());
    }
}
