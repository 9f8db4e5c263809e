//! End-to-end scenarios exercising the compile → resolve → schedule →
//! execute pipeline against small fixture manifests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn polyester() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("polyester").expect("binary `polyester` should be built")
}

fn write_manifest(root: &Path, script: &str) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join("polyester.sh"), script).unwrap();
}

fn apply(manifest_dir: &Path, state_dir: &Path) -> assert_cmd::assert::Assert {
    polyester()
        .args(["apply", "--manifest-dir"])
        .arg(manifest_dir)
        .args(["--state-dir"])
        .arg(state_dir)
        .assert()
}

/// Scenario 1: a manifest that only invokes `noop` reports a change on the
/// first apply and no change on the two that follow.
#[test]
fn noop_fixture_changes_once_then_settles() {
    let manifest = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    write_manifest(manifest.path(), "P noop\n");

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("1 changed, 0 failed, 1 total"));

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("0 changed, 0 failed, 1 total"));

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("0 changed, 0 failed, 1 total"));
}

/// Scenario 2: a `pcopy` whose declared source changes re-triggers, and
/// converges again once the rewritten manifest is applied twice.
#[test]
fn pcopy_reacts_to_source_file_change() {
    let manifest = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();
    let dest_file = dest_dir.path().join("c");

    std::fs::create_dir_all(manifest.path().join("files")).unwrap();
    std::fs::write(manifest.path().join("files").join("a"), "from-a\n").unwrap();
    std::fs::write(manifest.path().join("files").join("b"), "from-b\n").unwrap();
    write_manifest(manifest.path(), &format!("P pcopy a {}\n", dest_file.display()));

    apply(manifest.path(), state.path()).success();
    assert_eq!(std::fs::read_to_string(&dest_file).unwrap(), "from-a\n");

    write_manifest(manifest.path(), &format!("P pcopy b {}\n", dest_file.display()));
    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("1 changed, 0 failed, 1 total"));
    assert_eq!(std::fs::read_to_string(&dest_file).unwrap(), "from-b\n");

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("0 changed, 0 failed, 1 total"));
}

/// Scenario 4: two plans that depend on each other fail resolution with
/// both plan names mentioned, and nothing executes.
#[test]
fn circular_plan_dependency_is_rejected_before_anything_runs() {
    let manifest = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    std::fs::create_dir_all(manifest.path().join("plans").join("a")).unwrap();
    std::fs::create_dir_all(manifest.path().join("plans").join("b")).unwrap();
    std::fs::write(manifest.path().join("plans").join("a").join("plan.sh"), "P dependency b\n").unwrap();
    std::fs::write(manifest.path().join("plans").join("b").join("plan.sh"), "P dependency a\n").unwrap();
    write_manifest(manifest.path(), "P plan a\nP plan b\n");

    apply(manifest.path(), state.path())
        .failure()
        .stderr(predicate::str::contains("a"))
        .stderr(predicate::str::contains("b"));
}

/// Scenario 5: template rendering reacts to a change in `vars/default.yaml`.
#[test]
fn template_render_reacts_to_vars_change() {
    let manifest = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let out_file = out_dir.path().join("hi");

    std::fs::create_dir_all(manifest.path().join("templates")).unwrap();
    std::fs::write(manifest.path().join("templates").join("hello.tmpl"), "hi {{vars.name}}").unwrap();
    std::fs::create_dir_all(manifest.path().join("vars")).unwrap();
    std::fs::write(manifest.path().join("vars").join("default.yaml"), "name: world\n").unwrap();
    write_manifest(manifest.path(), &format!("P template hello.tmpl {}\n", out_file.display()));

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("1 changed, 0 failed, 1 total"));
    assert_eq!(std::fs::read_to_string(&out_file).unwrap(), "hi world");

    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("0 changed, 0 failed, 1 total"));

    std::fs::write(manifest.path().join("vars").join("default.yaml"), "name: there\n").unwrap();
    apply(manifest.path(), state.path())
        .success()
        .stdout(predicate::str::contains("1 changed, 0 failed, 1 total"));
    assert_eq!(std::fs::read_to_string(&out_file).unwrap(), "hi there");
}
