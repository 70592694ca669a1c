//! Integration tests for the labramp CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a Command for the labramp binary, isolated from user configuration
fn labramp(dir: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("labramp"));
    cmd.current_dir(dir).env("XDG_CONFIG_HOME", dir).env_remove("RUST_LOG");
    cmd
}

/// Write a local-backend plan whose workload reports its target rate.
fn write_local_plan(dir: &Path, rates: &[f64], mode: &str) -> PathBuf {
    let mut text = format!(
        r#"[plan]
name = "local ramp"

[workload]
command = ["sh", "-c", "echo starting; echo throughput={{rate}}"]

[plateau]
min_improvement_percent = 10.0
consecutive_steps_required = 2

[execution]
mode = "{mode}"
backend = "local"
"#
    );
    for rate in rates {
        text.push_str(&format!(
            "\n[[stages]]\ntarget_rate = {rate:?}\nduration_secs = 1\n"
        ));
    }
    let path = dir.join("plan.toml");
    std::fs::write(&path, text).unwrap();
    path
}

fn only_run_dir(results: &Path) -> PathBuf {
    let entries: Vec<PathBuf> = std::fs::read_dir(results)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected one run directory: {entries:?}");
    entries.into_iter().next().unwrap()
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_help() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("throughput plateaus"));
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// =============================================================================
// plateau
// =============================================================================

#[test]
fn test_plateau_detected() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["plateau", "--history", "100,102,103"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PLATEAU"));
}

#[test]
fn test_plateau_still_improving() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["plateau", "--history", "100,102,120"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IMPROVING"));
}

#[test]
fn test_plateau_json() {
    let temp = TempDir::new().unwrap();
    let output = labramp(temp.path())
        .args([
            "plateau",
            "--history",
            "100,104",
            "--min-improvement",
            "5",
            "--steps",
            "1",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["plateaued"], true);
    assert_eq!(json["policy"]["consecutive_steps_required"], 1);
}

#[test]
fn test_plateau_flags_after_history() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["plateau", "--history", "100,104", "--min-improvement", "5", "--steps", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PLATEAU"));
}

#[test]
fn test_plateau_history_repeated_flag() {
    let temp = TempDir::new().unwrap();
    let output = labramp(temp.path())
        .args(["plateau", "--history", "100", "--history", "102,103", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["history"], serde_json::json!([100.0, 102.0, 103.0]));
    assert_eq!(json["plateaued"], true);
}

#[test]
fn test_plateau_rejects_zero_steps() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["plateau", "--history", "1,2,3", "--steps", "0"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("consecutive_steps_required"));
}

// =============================================================================
// init / validate / script
// =============================================================================

#[test]
fn test_init_then_validate() {
    let temp = TempDir::new().unwrap();

    labramp(temp.path())
        .args(["init", "--name", "broker ramp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("labramp-plan.toml"));
    assert!(temp.path().join("labramp-plan.toml").exists());

    labramp(temp.path())
        .args(["validate", "labramp-plan.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Stages: 8"));
}

#[test]
fn test_init_refuses_overwrite() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path()).arg("init").assert().success();
    labramp(temp.path())
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));
    labramp(temp.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_validate_json() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 200.0], "auto");
    let output = labramp(temp.path())
        .arg("validate")
        .arg(&plan)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stages"], 2);
    assert_eq!(json["mode"], "sequential");
    assert_eq!(json["backend"], "local");
}

#[test]
fn test_validate_invalid_plan() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bad.toml");
    std::fs::write(
        &path,
        "[plan]\nname = \"x\"\n[workload]\ncommand = []\n[execution]\nbackend = \"local\"\n",
    )
    .unwrap();
    labramp(temp.path())
        .arg("validate")
        .arg(&path)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("workload.command"));
}

#[test]
fn test_validate_missing_file() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["validate", "nope.toml"])
        .assert()
        .code(6);
}

#[test]
fn test_script_output() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 200.0, 300.0], "batch");
    labramp(temp.path())
        .arg("script")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("#!/bin/sh"))
        .stdout(predicate::str::contains("labramp_is_plateaued"))
        .stdout(predicate::str::contains("labramp_stage 3 300 1 || exit 1"));
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_dry_run_submits_nothing() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 200.0, 300.0], "sequential");
    labramp(temp.path())
        .arg("run")
        .arg(&plan)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 job(s)"))
        .stdout(predicate::str::contains("local-ramp-"));
    assert!(!temp.path().join("results").exists());
}

#[cfg(unix)]
#[test]
fn test_run_sequential_stops_on_plateau() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 102.0, 103.0, 200.0, 300.0], "sequential");
    let results = temp.path().join("out");

    labramp(temp.path())
        .arg("run")
        .arg(&plan)
        .arg("--results-dir")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("plateaued after stage 3"))
        .stdout(predicate::str::contains("Skipped 2 of 5"));

    let run_dir = only_run_dir(&results);
    assert!(run_dir.file_name().unwrap().to_string_lossy().starts_with("local-ramp-"));
    let csv = std::fs::read_to_string(run_dir.join("stages.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);

    labramp(temp.path())
        .arg("report")
        .arg(run_dir.join("outcome.json"))
        .args(["--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3,103,103.00,"));
}

#[cfg(unix)]
#[test]
fn test_run_backend_override_skips_image_requirement() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 200.0], "sequential");
    let text = std::fs::read_to_string(&plan)
        .unwrap()
        .replace("backend = \"local\"", "backend = \"kubernetes\"");
    std::fs::write(&plan, text).unwrap();

    labramp(temp.path())
        .arg("validate")
        .arg(&plan)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("workload.image"));

    labramp(temp.path())
        .arg("run")
        .arg(&plan)
        .args(["--backend", "local", "--no-report"])
        .assert()
        .success()
        .stdout(predicate::str::contains("all stages completed"));
}

#[cfg(unix)]
#[test]
fn test_run_batch_stops_on_plateau() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 102.0, 103.0, 200.0, 300.0], "batch");

    let output = labramp(temp.path())
        .arg("run")
        .arg(&plan)
        .arg("--no-report")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["mode"], "batch");
    assert_eq!(json["stop_reason"]["reason"], "plateau");
    assert_eq!(json["stop_reason"]["stage"], 3);
    assert_eq!(json["history"], serde_json::json!([100.0, 102.0, 103.0]));
    assert!(!temp.path().join("results").exists());
}

#[cfg(unix)]
#[test]
fn test_run_completes_when_throughput_keeps_rising() {
    let temp = TempDir::new().unwrap();
    let plan = write_local_plan(temp.path(), &[100.0, 200.0, 400.0], "auto");

    labramp(temp.path())
        .arg("run")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("all stages completed"));
    assert!(temp.path().join("results").is_dir());
}

#[cfg(unix)]
#[test]
fn test_run_failing_workload_exits_nonzero_with_report() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fail.toml");
    std::fs::write(
        &path,
        r#"[plan]
name = "failing"

[workload]
command = ["sh", "-c", "echo boom >&2; exit 3"]

[[stages]]
target_rate = 10
duration_secs = 1

[[stages]]
target_rate = 20
duration_secs = 1

[execution]
mode = "sequential"
backend = "local"
"#,
    )
    .unwrap();

    labramp(temp.path())
        .arg("run")
        .arg(&path)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("stage 1 failed"));

    let run_dir = only_run_dir(&temp.path().join("results"));
    let summary = std::fs::read_to_string(run_dir.join("summary.md")).unwrap();
    assert!(summary.contains("**Failure:**"));
}

// =============================================================================
// config
// =============================================================================

#[test]
fn test_config_show_merges_project_file() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("labramp.toml"), "namespace = \"loadtest\"\n").unwrap();

    labramp(temp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("namespace = \"loadtest\""))
        .stdout(predicate::str::contains("loaded"));
}

#[test]
fn test_config_missing_explicit_file() {
    let temp = TempDir::new().unwrap();
    labramp(temp.path())
        .args(["--config", "missing.toml", "config", "show"])
        .assert()
        .code(6);
}
