use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::process::Command;

/// A line sensor timeout surfaces as a typed timeout, not a generic error.
#[rstest]
#[case(&["run"])]
#[case(&["run", "--sampler"])]
#[case(&["self-check"])]
fn timeout_bubbles_as_timeout(#[case] args: &[&str]) {
    Command::cargo_bin("tracer")
        .unwrap()
        .args(["--log-level", "error"])
        .args(args)
        .env("TRACER_TEST_SIM_FAULT", "line")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Line sensor read timed out"));
}

#[rstest]
fn timeout_json_reason() {
    let output = Command::cargo_bin("tracer")
        .unwrap()
        .args(["--json", "--log-level", "error", "run"])
        .env("TRACER_TEST_SIM_FAULT", "line")
        .assert()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or_else(|| panic!("no error JSON; stderr was: {stderr}"));
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "Timeout");
}
