//! End-to-end runs of the `detqa` binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;

use crate::fits::{populate, write_fits, Extension};

fn detqa() -> Command {
    Command::cargo_bin("detqa").expect("binary should build")
}

/// Input directory with four images and a config pointing at its geometry.
fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let geometry = populate(dir.path(), 2, 2);
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[pipeline]\ninstrument_files = [{:?}]\n\n[output]\nordering = \"image-name\"\n",
            geometry.display().to_string()
        ),
    )
    .expect("should write config");
    (dir, config)
}

fn keys(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).expect("should read document");
    let doc: Value = serde_json::from_str(&text).expect("document should be valid JSON");
    let mut keys: Vec<String> = doc
        .as_object()
        .expect("document should be an object")
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}

const IMAGES: [&str; 4] = [
    "frame0.fits[1]",
    "frame0.fits[2]",
    "frame1.fits[1]",
    "frame1.fits[2]",
];

#[test]
fn help_lists_public_subcommands_only() {
    let output = detqa().arg("--help").output().expect("run");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("run"));
    assert!(text.contains("local"));
    assert!(text.contains("inspect"));
    assert!(!text.lines().any(|l| l.trim_start().starts_with("worker")));
}

#[test]
fn zero_processors_is_rejected() {
    detqa().args(["run", "-p", "0"]).assert().failure();
}

#[test]
fn multi_process_run_collects_every_image() {
    let (dir, config) = workspace();
    let report = dir.path().join("report.out");
    let results = dir.path().join("results.out");

    let output = detqa()
        .arg("run")
        .arg("-i")
        .arg(dir.path())
        .arg("-o")
        .arg(&report)
        .arg("-r")
        .arg(&results)
        .args(["-p", "3"])
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Execution time:"));
    assert_eq!(keys(&report), IMAGES);
    assert_eq!(keys(&results), IMAGES);
}

#[test]
fn multi_process_run_survives_a_failing_worker() {
    let (dir, config) = workspace();
    write_fits(&dir.path().join("bad.fits"), &[Extension::off_geometry()]);
    let report = dir.path().join("report.out");
    let results = dir.path().join("results.out");

    let output = detqa()
        .arg("run")
        .arg("-i")
        .arg(dir.path())
        .arg("-o")
        .arg(&report)
        .arg("-r")
        .arg(&results)
        .args(["-p", "2"])
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(keys(&report), IMAGES);
    assert_eq!(keys(&results), IMAGES);
}

#[test]
fn local_run_writes_report_to_stdout_on_dash() {
    let (dir, config) = workspace();
    let results = dir.path().join("results.out");

    let output = detqa()
        .current_dir(dir.path())
        .arg("local")
        .arg("-i")
        .arg(dir.path())
        .args(["-o", "-"])
        .arg("-r")
        .arg(&results)
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for image in IMAGES {
        assert!(stdout.contains(&format!("\"{image}\"")), "missing {image}");
    }
    assert!(stdout.contains("Nominal"));
    assert!(!dir.path().join("-").exists());
    assert_eq!(keys(&results), IMAGES);
}

#[test]
fn local_run_writes_both_documents() {
    let (dir, config) = workspace();
    let report = dir.path().join("report.out");
    let results = dir.path().join("results.out");

    detqa()
        .arg("local")
        .arg("-i")
        .arg(dir.path())
        .arg("-o")
        .arg(&report)
        .arg("-r")
        .arg(&results)
        .arg("--config")
        .arg(&config)
        .assert()
        .success();
    assert_eq!(keys(&report), IMAGES);
    assert_eq!(keys(&results), IMAGES);
}

#[test]
fn inspect_prints_the_resolved_plan() {
    let (dir, config) = workspace();
    let item = format!("{}[2]", dir.path().join("frame1.fits").display());

    let output = detqa()
        .args(["inspect", &item, "--config"])
        .arg(&config)
        .output()
        .expect("run");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("frame1.fits[2]"));
    assert!(text.contains("instrument: VIS"));
    assert!(text.contains("checks:     OVERSCAN, SCIENCE STATS, PIXELS BELOW ADC"));
    assert!(text.contains("PRESCAN_REP"));
}
