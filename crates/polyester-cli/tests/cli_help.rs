//! Smoke tests for the bare CLI surface: help, version, and the hidden
//! plumbing commands' guard rails.

use assert_cmd::Command;
use predicates::prelude::*;

fn polyester() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("polyester").expect("binary `polyester` should be built")
}

#[test]
fn bare_invocation_prints_usage_and_exits_zero() {
    polyester().assert().success().stdout(predicate::str::contains("Usage"));
}

#[test]
fn help_flag_lists_check_and_apply() {
    polyester()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("apply"));
}

#[test]
fn hidden_operator_call_without_poly_plan_env_fails() {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("polyester").unwrap();
    cmd.args(["touch", "/tmp/whatever"]).env_remove("_POLY_PLAN");
    cmd.assert().failure().stderr(predicate::str::contains("_POLY_PLAN"));
}

#[test]
fn check_on_empty_dir_reports_missing_main_script() {
    let dir = tempfile::tempdir().unwrap();
    polyester()
        .args(["check", "--manifest-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
