//! The `apt-install` operator: ensures a set of packages is installed,
//! diffing against `dpkg-query` output rather than assuming a bare image.

use crate::operator::{OpContext, OpError, Operator};
use polyester_core::{State, StateEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptInstallOpts {
    pub packages: Vec<String>,
}

pub struct AptInstall(pub AptInstallOpts);

/// Queries `dpkg-query` for every currently-installed package's version.
/// Returns an empty map (not an error) when `dpkg-query` itself is
/// missing, so this operator degrades gracefully off Debian-family hosts
/// during `check`.
fn installed_versions() -> BTreeMap<String, String> {
    let output = Command::new("dpkg-query")
        .args(["-W", "-f=${Package} ${Version}\n"])
        .output();

    let mut map = BTreeMap::new();
    let Ok(output) = output else { return map };
    if !output.status.success() {
        return map;
    }
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Some((name, version)) = line.split_once(' ') {
            map.insert(name.to_string(), version.to_string());
        }
    }
    map
}

impl Operator for AptInstall {
    fn name(&self) -> &'static str {
        "apt-install"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        let installed = installed_versions();

        let mut requested_kv = BTreeMap::new();
        for pkg in &self.0.packages {
            requested_kv.insert(pkg.clone(), serde_json::json!(true));
        }

        let mut installed_kv = BTreeMap::new();
        for pkg in &self.0.packages {
            if let Some(version) = installed.get(pkg) {
                installed_kv.insert(pkg.clone(), serde_json::json!(version));
            }
        }

        Ok(State::new().append([
            StateEntry::kv("requested", requested_kv),
            {
                let mut se = StateEntry::kv("installed", installed_kv);
                se.target = true;
                se
            },
        ]))
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        if self.0.packages.is_empty() {
            return self.get_state(ctx);
        }
        let mut cmd = Command::new("apt-get");
        cmd.arg("install").arg("-y").args(&self.0.packages);
        let status = cmd.status()?;
        if !status.success() {
            return Err(OpError::System(format!("apt-get install exited with {status}")));
        }
        self.get_state(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpkg_query_line_parses_as_name_version() {
        let line = "curl 7.81.0-1ubuntu1.15";
        let (name, version) = line.split_once(' ').unwrap();
        assert_eq!(name, "curl");
        assert_eq!(version, "7.81.0-1ubuntu1.15");
    }
}
