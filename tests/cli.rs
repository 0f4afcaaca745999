//! CLI integration tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn stampede() -> Command {
    Command::cargo_bin("stampede").unwrap()
}

#[test]
fn help_lists_subcommands() {
    stampede()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn validate_rejects_missing_config() {
    stampede()
        .args(["--config", "does-not-exist.toml", "validate"])
        .assert()
        .failure();
}

#[test]
fn init_validate_run_roundtrip() {
    let dir = TempDir::new().unwrap();

    stampede()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("stampede.toml"));

    stampede()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"));

    stampede()
        .current_dir(dir.path())
        .args(["run", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All tests passed!"));

    assert!(dir.path().join("stampede-results/summary.json").exists());
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("stampede.toml"), "# existing").unwrap();

    stampede().current_dir(dir.path()).arg("init").assert().failure();
}

#[test]
fn failing_suite_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("stampede.toml"),
        r#"[suite]
type = "manifest"
path = "tests.json"

[fleet]
type = "simulated"
devices = 1
fail_tests = ["SmokeTest#launches"]
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("tests.json"),
        r#"{
  "component": "app-debug",
  "tests": [
    { "package": "com.example", "class": "SmokeTest", "method": "launches" },
    { "package": "com.example", "class": "SmokeTest", "method": "rendersHome" }
  ]
}
"#,
    )
    .unwrap();

    stampede()
        .current_dir(dir.path())
        .args(["run", "--no-progress"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Some tests failed."));
}
