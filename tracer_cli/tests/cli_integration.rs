use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Sim backend; only the cap and logging level differ from the defaults.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[runner]
loop_hz = 1000
# two laps of the oval take well under 10 s of simulated time
max_run_ms = 30000
mode = "direct"

[logging]
level = "warn"

[[profiles]]
name = "gentle"
kp = 1.5
kd = 20.0
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["run"], 0, "Run complete: 2 laps", "stdout")]
#[case(&["run", "--profile", "gentle"], 0, "Run complete: 2 laps", "stdout")]
#[case(&["run", "--max-run-ms", "100"], 4, "max run time", "stderr")]
#[case(&["run", "--profile", "nope"], 1, "unknown profile 'nope'", "stderr")]
#[case(&["run", "--direct", "--sampler"], 2, "cannot be used with", "stderr")]
#[case(&["self-check"], 0, "ok (sim)", "stdout")]
#[case(&["health"], 0, "config valid", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("tracer").unwrap();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let bad_csv = dir.path().join("calib.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "raw,value").unwrap();
    writeln!(f, "100,0.0").unwrap();

    let mut cmd = Command::cargo_bin("tracer").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("self-check");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn cli_reports_invalid_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[speed]\nmax_speed = 300\n").unwrap();

    Command::cargo_bin("tracer")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("health")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid"))
        .stderr(predicate::str::contains("max_speed"));
}

#[rstest]
fn runs_with_builtin_defaults() {
    Command::cargo_bin("tracer")
        .unwrap()
        .args(["--log-level", "error", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 laps"));
}

#[rstest]
fn calibrate_writes_csv_that_run_accepts() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = dir.path().join("cal.csv");

    Command::cargo_bin("tracer")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Calibration saved"));

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("sensor,min,max"));
    let rows: Vec<Vec<u32>> = lines
        .map(|l| l.split(',').map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 6);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[0] as usize, i);
        assert!(row[1] <= row[2], "sensor {i}: {row:?}");
    }

    // The saved table loads back through --calibration.
    Command::cargo_bin("tracer")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--calibration")
        .arg(&out)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration csv"));
}
