use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn media_dedups(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("media-dedups").unwrap();
    // keep ~/.mediadeduprc and the user's cache out of the tests
    cmd.env("HOME", home);
    cmd
}

#[test]
fn test_missing_root_fails() {
    let home = tempdir().unwrap();
    media_dedups(home.path())
        .arg(home.path().join("does-not-exist"))
        .arg("--no-cache")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_empty_directory_reports_nothing() {
    let home = tempdir().unwrap();
    let root = tempdir().unwrap();
    media_dedups(home.path())
        .arg(root.path())
        .arg("--no-cache")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 0 duplicate clusters"));
}

#[test]
fn test_json_report_on_stdout() {
    let home = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs::write(root.path().join("notes.txt"), "not media").unwrap();

    let output = media_dedups(home.path())
        .arg(root.path())
        .args(["--no-cache", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["summary"]["files_scanned"], 0);
}

#[test]
fn test_report_written_to_output_file() {
    let home = tempdir().unwrap();
    let root = tempdir().unwrap();
    let report_path = home.path().join("reports").join("run.toml");

    media_dedups(home.path())
        .arg(root.path())
        .args(["--no-cache", "--format", "toml", "-o"])
        .arg(&report_path)
        .assert()
        .success();

    let content = fs::read_to_string(&report_path).unwrap();
    assert!(content.contains("dry_run = true"));
}

#[test]
fn test_unknown_keep_strategy_is_rejected() {
    let home = tempdir().unwrap();
    let root = tempdir().unwrap();
    media_dedups(home.path())
        .arg(root.path())
        .args(["--keep", "random"])
        .assert()
        .failure();
}

#[test]
fn test_first_run_writes_default_config() {
    let home = tempdir().unwrap();
    let root = tempdir().unwrap();
    let rc = home.path().join(".mediadeduprc");
    assert!(!rc.exists());

    media_dedups(home.path())
        .arg(root.path())
        .arg("--no-cache")
        .assert()
        .success();

    let content = fs::read_to_string(&rc).unwrap();
    assert!(content.contains("keep = \"largest\""));
}
