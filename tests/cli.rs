use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const FACTS_HEADER: &str = "student_id,week_start,week_end,assignments_total,assignments_completed,\
assignments_on_time,assignments_late,average_grade,messages_sent,questions_asked,\
scheduled_classes,attended_classes,study_hours,materials_viewed,participation_score";

fn tutor(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("tutor-rating");
    cmd.current_dir(dir)
        .env_remove("DATABASE_URL")
        .env_remove("TUTOR_ASSIGNMENT_WEIGHT")
        .env_remove("TUTOR_ACTIVITY_WEIGHT")
        .env_remove("TUTOR_ATTENDANCE_WEIGHT")
        .env_remove("TUTOR_ENGAGEMENT_WEIGHT");
    cmd
}

fn write_facts(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("facts.csv");
    let contents = format!(
        "{FACTS_HEADER}\n\
         1,2026-02-02,2026-02-08,5,5,5,0,100,5,0,2,2,10,5,100\n\
         2,2026-02-02,2026-02-08,,,,,,,,,,,,\n\
         abc,2026-02-02,2026-02-08,1,1,1,0,90,1,0,1,1,1,1,1\n"
    );
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn help_lists_commands() {
    let dir = tempdir().unwrap();
    tutor(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rate-file"))
        .stdout(predicate::str::contains("report"));
}

#[test]
fn rate_file_prints_ratings_and_mix() {
    let dir = tempdir().unwrap();
    let csv = write_facts(dir.path());

    tutor(dir.path())
        .args(["rate-file", "--csv"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("- Student #1 score 100.00 (high)"))
        .stdout(predicate::str::contains("- Student #2 score 20.00 (critical)"))
        .stdout(predicate::str::contains(
            "Category mix: high 1, medium 0, low 0, critical 1",
        ));
}

#[test]
fn rate_file_json_has_ratings() {
    let dir = tempdir().unwrap();
    let csv = write_facts(dir.path());

    let output = tutor(dir.path())
        .args(["rate-file", "--json", "--csv"])
        .arg(&csv)
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ratings = value["ratings"].as_array().unwrap();
    assert_eq!(ratings.len(), 2);
    assert_eq!(ratings[0]["student_id"], 1);
    assert_eq!(ratings[0]["category"], "high");
    assert_eq!(ratings[1]["weekly_score"], 20.0);
    assert_eq!(ratings[1]["attendance_score"], 100.0);
    assert!(value["failures"].as_array().unwrap().is_empty());

    let unreadable = value["unreadable_rows"].as_array().unwrap();
    assert_eq!(unreadable.len(), 1);
    assert_eq!(unreadable[0]["line"], 4);
}

#[test]
fn rate_file_reports_rows_with_reversed_weeks() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("reversed.csv");
    fs::write(
        &csv,
        format!(
            "{FACTS_HEADER}\n\
             1,2026-02-09,2026-02-02,5,5,5,0,100,5,0,2,2,10,5,100\n\
             2,2026-02-02,2026-02-08,5,5,5,0,100,5,0,2,2,10,5,100\n"
        ),
    )
    .unwrap();

    let output = tutor(dir.path())
        .args(["rate-file", "--json", "--csv"])
        .arg(&csv)
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ratings = value["ratings"].as_array().unwrap();
    assert_eq!(ratings.len(), 1);
    assert_eq!(ratings[0]["student_id"], 2);

    let failures = value["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["student_id"], 1);
    assert!(failures[0]["error"]
        .as_str()
        .unwrap()
        .contains("is after week end"));
}

#[test]
fn rate_file_ignores_non_numeric_measurements() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("nan.csv");
    fs::write(
        &csv,
        format!(
            "{FACTS_HEADER}\n\
             1,2026-02-02,2026-02-08,,,,,,,,,,NaN,0,NaN\n\
             2,2026-02-02,2026-02-08,4,4,4,0,NaN,,,,,,,\n"
        ),
    )
    .unwrap();

    let output = tutor(dir.path())
        .args(["rate-file", "--json", "--csv"])
        .arg(&csv)
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ratings = value["ratings"].as_array().unwrap();
    assert_eq!(ratings.len(), 2);
    assert_eq!(ratings[0]["engagement_score"], 0.0);
    assert_eq!(ratings[1]["assignment_score"], 80.0);
}

#[test]
fn rate_file_honors_custom_weights() {
    let dir = tempdir().unwrap();
    let csv = write_facts(dir.path());

    tutor(dir.path())
        .args([
            "rate-file",
            "--assignment-weight",
            "0",
            "--activity-weight",
            "0",
            "--attendance-weight",
            "1",
            "--engagement-weight",
            "0",
            "--csv",
        ])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("- Student #2 score 100.00 (high)"));
}

#[test]
fn invalid_weights_are_rejected() {
    let dir = tempdir().unwrap();
    let csv = write_facts(dir.path());

    tutor(dir.path())
        .args(["rate-file", "--assignment-weight", "0.9", "--csv"])
        .arg(&csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid rating configuration"));
}

#[test]
fn weights_from_environment_are_validated() {
    let dir = tempdir().unwrap();
    let csv = write_facts(dir.path());

    tutor(dir.path())
        .env("TUTOR_ENGAGEMENT_WEIGHT", "-0.1")
        .args(["rate-file", "--csv"])
        .arg(&csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("engagement weight"));
}

#[test]
fn missing_csv_fails() {
    let dir = tempdir().unwrap();

    tutor(dir.path())
        .args(["rate-file", "--csv", "nope.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.csv"));
}

#[test]
fn database_commands_need_a_url() {
    let dir = tempdir().unwrap();

    tutor(dir.path())
        .args(["students", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DATABASE_URL"));
}

#[test]
fn week_bounds_come_in_pairs() {
    let dir = tempdir().unwrap();

    tutor(dir.path())
        .args(["facts", "--student", "1", "--week-start", "2026-02-02"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--week-end"));
}

#[test]
fn rate_needs_exactly_one_scope() {
    let dir = tempdir().unwrap();

    tutor(dir.path()).arg("rate").assert().failure();

    tutor(dir.path())
        .args(["rate", "--student", "1", "--stream", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
