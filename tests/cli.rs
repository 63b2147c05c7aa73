//! CLI integration tests for msurvey
//!
//! Runs the binary end-to-end against the field books in `fixtures/`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
        .to_string_lossy()
        .to_string()
}

/// The binary, run inside `dir` so no stray config file is picked up.
#[allow(deprecated)]
fn msurvey(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("msurvey").unwrap();
    cmd.current_dir(dir.path());
    cmd.env_remove("MSURVEY_CONFIG");
    cmd
}

#[test]
fn test_compass_writes_report() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["compass", &fixture("compass.csv"), "--start-e", "1000", "--start-n", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linear misclosure"))
        .stdout(predicate::str::contains("Report saved to"));

    let report = std::fs::read_to_string(temp_dir.path().join("compass_compass.md")).unwrap();
    assert!(report.contains("# Compass Traverse"));
    assert!(report.contains("| A-B |"));
}

#[test]
fn test_compass_csv_and_kml_exports() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args([
            "compass",
            &fixture("compass.csv"),
            "--start-e",
            "565000",
            "--start-n",
            "5933000",
            "--csv",
            "--kml",
            "--epsg",
            "32632",
            "-o",
            "out",
        ])
        .assert()
        .success();

    let out = temp_dir.path().join("out");
    let csv = std::fs::read_to_string(out.join("compass_compass.csv")).unwrap();
    assert!(csv.starts_with("Point,Easting,Northing,Elevation"));
    let kml = std::fs::read_to_string(out.join("compass_compass.kml")).unwrap();
    assert!(kml.contains("<Placemark>"));
}

#[test]
fn test_min_precision_gate() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["compass", &fixture("compass.csv"), "--min-precision", "1000"])
        .assert()
        .success();

    msurvey(&temp_dir)
        .args(["compass", &fixture("compass.csv"), "--min-precision", "1000000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("worse than 1 in 1000000"));
}

#[test]
fn test_theodolite_closed_traverse() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args([
            "theodolite",
            &fixture("theodolite.csv"),
            "--initial-azimuth",
            "90.0000",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Angular misclosure"));

    let json = std::fs::read_to_string(temp_dir.path().join("theodolite_theodolite.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["metadata"]["kind"], "theodolite");
}

#[test]
fn test_level_misclosure_gate() {
    let temp_dir = TempDir::new().unwrap();
    let book = fixture("leveling.csv");

    msurvey(&temp_dir)
        .args(["level", &book, "--start-elevation", "100", "--closing-elevation", "100"])
        .args(["--max-misclosure", "0.02"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Closure error: 0.0130 m"));

    msurvey(&temp_dir)
        .args(["level", &book, "--start-elevation", "100", "--closing-elevation", "100"])
        .args(["--max-misclosure", "0.005"])
        .assert()
        .code(2);
}

#[test]
fn test_trig_level_and_triangulate() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args([
            "trig-level",
            &fixture("trig.csv"),
            "--elevation",
            "250",
            "--instrument-height",
            "1.55",
            "--curvature",
        ])
        .assert()
        .success();
    assert!(temp_dir.path().join("trig_trig-leveling.md").exists());

    msurvey(&temp_dir)
        .args([
            "triangulate",
            &fixture("triangles.csv"),
            "--base-distance",
            "100",
            "--base-azimuth",
            "90",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Triangles: 2"));
}

#[test]
fn test_intersect_prints_new_point() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args([
            "intersect", "--a-e", "0", "--a-n", "0", "--b-e", "100", "--b-n", "0", "--angle-a",
            "45", "--angle-b", "45",
        ])
        .assert()
        .success();

    let report = std::fs::read_to_string(temp_dir.path().join("intersection.md")).unwrap();
    assert!(report.contains("50.0000"));
}

#[test]
fn test_network_adjustment() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["network", &fixture("stations.csv"), &fixture("observations.csv")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converged: Yes"));
}

#[test]
fn test_quad_job() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["quad", &fixture("jobs/quad.toml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Braced quadrilateral ABCD"));

    msurvey(&temp_dir)
        .args(["quad", &fixture("jobs/compass.toml")])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not a braced quadrilateral"));
}

#[test]
fn test_convert_to_utm() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["convert", &fixture("points.csv"), "--from", "4326", "--to", "32632", "--csv"])
        .assert()
        .success();

    let csv = std::fs::read_to_string(temp_dir.path().join("points_convert.csv")).unwrap();
    assert!(csv.contains("Hamburg"));
}

#[test]
fn test_convert_unsupported_epsg() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["convert", &fixture("points.csv"), "--from", "4326", "--to", "2193"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Unsupported coordinate reference system EPSG:2193",
        ));
}

#[test]
fn test_dms_conversion() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["dms", "123.4530"])
        .assert()
        .success()
        .stdout(predicate::str::contains("123.75833333"));

    msurvey(&temp_dir)
        .args(["dms", "123.75833333", "--to-dms"])
        .assert()
        .success()
        .stdout(predicate::str::contains("123.4530"));
}

#[test]
fn test_dms_rejects_non_finite() {
    let temp_dir = TempDir::new().unwrap();

    for value in ["NaN", "inf"] {
        msurvey(&temp_dir)
            .args(["dms", value, "--to-dms"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(format!("Invalid angle '{}'", value)));
    }
}

#[test]
fn test_convert_off_zone_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("far.csv");
    std::fs::write(&input, "name,x,y,z
Jakarta,106.85,-6.2,8.0
").unwrap();

    msurvey(&temp_dir)
        .args(["convert", &input.to_string_lossy(), "--from", "4326", "--to", "32632", "--csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("from the central meridian"));

    assert!(!temp_dir.path().join("far_convert.csv").exists());
}

#[test]
fn test_utm_zone() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["utm-zone", "--lon", "9.99", "--lat", "53.55"])
        .assert()
        .success()
        .stdout(predicate::str::contains("UTM zone 32N"))
        .stdout(predicate::str::contains("EPSG:32632"));

    msurvey(&temp_dir)
        .args(["utm-zone", "--lon", "-70.6", "--lat", "-33.4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EPSG:32719"));
}

#[test]
fn test_init_config_refuses_overwrite() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .arg("init-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created .msurvey.toml"));

    let content = std::fs::read_to_string(temp_dir.path().join(".msurvey.toml")).unwrap();
    assert!(content.contains("[general]"));

    msurvey(&temp_dir)
        .arg("init-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_file_sets_format() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(".msurvey.toml"),
        "[general]\nformat = \"json\"\n",
    )
    .unwrap();

    msurvey(&temp_dir)
        .args(["compass", &fixture("compass.csv")])
        .assert()
        .success();

    assert!(temp_dir.path().join("compass_compass.json").exists());
}

#[test]
fn test_batch_writes_summary() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["batch", &fixture("jobs"), "-o", "reports", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 succeeded"));

    let reports = temp_dir.path().join("reports");
    let summary = std::fs::read_to_string(reports.join("batch_summary.md")).unwrap();
    assert!(summary.contains("Compass Traverse"));
    assert!(reports.join("compass.md").exists());
    assert!(reports.join("quad.kml").exists());
    assert!(!reports.join("leveling.kml").exists());
}

#[test]
fn test_batch_missing_dir() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["batch", "no-such-dir"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Job directory does not exist"));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    let temp_dir = TempDir::new().unwrap();

    msurvey(&temp_dir)
        .args(["-v", "-q", "dms", "10.30"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot use both --verbose and --quiet"));
}

#[test]
fn test_malformed_csv_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("broken.csv");
    std::fs::write(&input, "line,bearing,distance\nA-B,north,ten\n").unwrap();

    msurvey(&temp_dir)
        .args(["compass", &input.to_string_lossy()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read"));
}
