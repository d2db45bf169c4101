//! Integration tests for the perfscope demo binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_text_output_lists_frame_tree() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n").arg("3").arg("--interval-ms").arg("0");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("frame = "))
        .stdout(predicate::str::contains("frame.input = \"frame 2\""))
        .stdout(predicate::str::contains("\n      update = "))
        .stdout(predicate::str::contains("frame.update.physics = "))
        .stdout(predicate::str::contains("frame.[[internals]]"))
        .stdout(predicate::str::contains(" ms\n"));
}

#[test]
fn test_json_output_parses() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n")
        .arg("2")
        .arg("--interval-ms")
        .arg("0")
        .arg("--format")
        .arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let parsed: serde_json::Value =
        serde_json::from_slice(&output).expect("stdout should be valid JSON");
    let traces = parsed.as_array().expect("array of traces");
    assert_eq!(traces[0]["key"], "frame");
    assert!(traces
        .iter()
        .any(|t| t["key"] == "present" && t["value"]["kind"] == "duration"));
}

#[test]
fn test_pattern_filters_and_subscribes() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n")
        .arg("2")
        .arg("--interval-ms")
        .arg("0")
        .arg("-e")
        .arg("frame\\.render.*")
        .arg("--subscribe")
        .arg("true");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("frame.render(+) = "))
        .stdout(predicate::str::contains("frame.render.mode(+) = "))
        .stdout(predicate::str::contains("update").not());
}

#[test]
fn test_invalid_pattern_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n").arg("1").arg("-e").arg("(unclosed");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid trace pattern"));
}

#[test]
fn test_config_file_disables_internals() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "internals = false").unwrap();
    file.flush().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n")
        .arg("2")
        .arg("--interval-ms")
        .arg("0")
        .arg("--config")
        .arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[[internals]]").not())
        .stdout(predicate::str::contains("frame.render"));
}

#[test]
fn test_missing_config_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("--config").arg("/nonexistent/perfscope.toml");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn test_sampling_with_too_few_iterations_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfscope");
    cmd.arg("-n")
        .arg("2")
        .arg("--interval-ms")
        .arg("0")
        .arg("--fork-interval")
        .arg("5");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no iteration was traced"));
}
