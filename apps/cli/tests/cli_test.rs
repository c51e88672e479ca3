//! Integration tests for the `scribe` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn scribe() -> Command {
    Command::cargo_bin("scribe").unwrap()
}

#[test]
fn test_config_init_then_show() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("scribe").join("orchestrator.toml");

    scribe().arg("config").arg("init").arg("--config").arg(&path).assert().success();
    assert!(path.exists());

    scribe()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[refinement]"))
        .stdout(predicate::str::contains("max_iterations = 3"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("orchestrator.toml");
    std::fs::write(&path, "[orchestrator]\n").unwrap();

    scribe()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    scribe().args(["config", "init", "--force", "--config"]).arg(&path).assert().success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[orchestrator.execution]"));
}

#[test]
fn test_config_show_rejects_invalid_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "[orchestrator.refinement]\nbest_of_n = 0\n").unwrap();

    scribe()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("best_of_n"));
}

#[test]
fn test_classify_uses_local_patterns() {
    scribe()
        .args(["classify", "Create a podcast"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"intent\": \"create_structure\""));
}

#[test]
fn test_orchestrate_with_mock_models_prints_json() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("orchestrator.toml");
    scribe().args(["config", "init", "--config"]).arg(&config).assert().success();

    let output = scribe()
        .args(["orchestrate", "--mock", "--json", "--session", "s-cli", "--config"])
        .arg(&config)
        .arg("hello there")
        .output()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["session_id"], "s-cli");
    assert!(json["trace"].is_array());
}

#[test]
fn test_section_flags_come_in_pairs() {
    scribe()
        .args(["orchestrate", "--mock", "--section-id", "ch1", "write it"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--section-name"));
}
