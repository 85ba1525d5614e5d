use std::fs::File;
use std::io::Write;

use rstest::rstest;
use tempfile::tempdir;
use tracer_config::{PersistedCalibration, load_calibration_csv, save_calibration_csv};

fn write(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    for l in lines {
        writeln!(f, "{l}").unwrap();
    }
    (dir, path)
}

#[rstest]
fn loads_rows_in_any_order() {
    let (_dir, path) = write(&[
        "sensor,min,max",
        "5,105,905",
        "0,100,900",
        "1,101,901",
        "2,102,902",
        "4,104,904",
        "3,103,903",
    ]);
    let c = load_calibration_csv(&path).unwrap();
    assert_eq!(c.min, [100, 101, 102, 103, 104, 105]);
    assert_eq!(c.max, [900, 901, 902, 903, 904, 905]);
}

#[rstest]
fn save_then_load_preserves_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let cal = PersistedCalibration {
        min: [88, 90, 77, 120, 95, 101],
        max: [940, 911, 905, 899, 930, 921],
    };
    save_calibration_csv(&path, &cal).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("sensor,min,max\n0,88,940\n"), "{text}");
    assert_eq!(load_calibration_csv(&path).unwrap(), cal);
}

#[rstest]
fn csv_with_wrong_header_errors() {
    let (_dir, path) = write(&["raw,value", "100,0.5"]);
    let err = load_calibration_csv(&path).expect_err("should error on bad headers");
    assert!(format!("{err}").contains("headers 'sensor,min,max'"));
}

#[rstest]
fn csv_with_non_numeric_errors() {
    let (_dir, path) = write(&["sensor,min,max", "0,abc,900"]);
    let err = load_calibration_csv(&path).expect_err("should error on non-numeric");
    assert!(format!("{err}").contains("invalid CSV row 2"));
}

#[rstest]
#[case(&["sensor,min,max", "6,1,2"], "out of range")]
#[case(&["sensor,min,max", "0,1,2", "0,1,2"], "listed twice")]
#[case(&["sensor,min,max", "0,1,2", "1,1,2", "2,1,2", "3,1,2", "4,1,2"], "missing sensor 5")]
#[case(&["sensor,min,max", "0,1,2", "1,1,2", "2,1,2", "3,1,2", "4,1,2", "5,9,2"], "sensor 5: min 9 exceeds max 2")]
fn rejects_incomplete_or_inconsistent_tables(#[case] lines: &[&str], #[case] needle: &str) {
    let (_dir, path) = write(lines);
    let err = load_calibration_csv(&path).expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[rstest]
fn missing_file_errors() {
    let dir = tempdir().unwrap();
    let err = load_calibration_csv(&dir.path().join("nope.csv")).expect_err("missing");
    assert!(format!("{err}").contains("open calibration CSV"));
}
