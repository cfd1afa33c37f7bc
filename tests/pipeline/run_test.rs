//! Local and in-process runs over FITS files on disk.

use std::path::Path;

use serde_json::Value;

use detqa::controller::{run_in_process, run_local, Pipeline, RunOptions};
use detqa::output::EntryOrder;

use crate::fits::{config, populate, write_fits, Extension};

fn options(dir: &Path, workers: usize) -> RunOptions {
    RunOptions {
        input_dir: dir.to_path_buf(),
        report_path: dir.join("report.out"),
        results_path: dir.join("results.out"),
        workers,
        verbose: false,
        config_path: None,
    }
}

fn read_json(path: &Path) -> serde_json::Map<String, Value> {
    let text = std::fs::read_to_string(path).expect("should read document");
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => map,
        other => panic!("{} is not a JSON object: {other:?}", path.display()),
    }
}

fn expected_names() -> Vec<String> {
    let mut names = Vec::new();
    for f in 0..2 {
        for e in 1..=2 {
            names.push(format!("frame{f}.fits[{e}]"));
        }
    }
    names
}

fn assert_documents(dir: &Path) {
    let report = read_json(&dir.join("report.out"));
    let results = read_json(&dir.join("results.out"));
    let mut report_keys: Vec<String> = report.keys().cloned().collect();
    report_keys.sort();
    assert_eq!(report_keys, expected_names());
    assert_eq!(results.len(), 4);

    let first = &report["frame0.fits[1]"];
    assert_eq!(first["Over-Scan"]["Result"], "Nominal");
    assert_eq!(first["Pre-Scan"]["Result"], "Nominal");
    assert_eq!(first["Pixels_below_ADC"]["Number"], 5);

    let measured = &results["frame1.fits[2]"];
    assert_eq!(measured["Pre-Scan"]["average"], 2.0);
    assert_eq!(measured["Over-Scan"]["median"], serde_json::json!([10.0, 10.0, 10.0, 10.0]));
    assert_eq!(measured["ScienceStats"]["zeros"], false);
}

#[tokio::test]
async fn local_run_writes_both_documents() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let geometry = populate(dir.path(), 2, 2);
    let config = config(&geometry);

    let summary = run_local(&config, &options(dir.path(), 1))
        .await
        .expect("local run");
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.skipped, 0);
    assert_documents(dir.path());
}

#[tokio::test]
async fn in_process_workers_split_the_work_set() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let geometry = populate(dir.path(), 2, 2);
    write_fits(
        &dir.path().join("other.fits"),
        &[Extension {
            instrument: "NISP",
            mode: "SCIENCE",
            overscan: 10.0,
            detector: 0,
        }],
    );
    let mut config = config(&geometry);
    config.output.ordering = EntryOrder::ImageName;

    let summary = run_in_process(&config, &options(dir.path(), 3))
        .await
        .expect("in-process run");
    assert_eq!(summary.workers, 3);
    assert_eq!(summary.failed_workers, 0);
    assert_eq!(summary.items_served, 5);
    assert_eq!(summary.reports_written, 4);
    assert_eq!(summary.results_written, 4);
    assert_documents(dir.path());

    let text = std::fs::read_to_string(dir.path().join("results.out")).expect("read");
    let positions: Vec<usize> = expected_names()
        .iter()
        .map(|name| text.find(&format!("\"{name}\"")).expect("entry present"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "entries sorted by name");
}

#[tokio::test]
async fn failed_worker_leaves_the_rest_of_the_run_intact() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let geometry = populate(dir.path(), 2, 2);
    write_fits(&dir.path().join("bad.fits"), &[Extension::off_geometry()]);
    let config = config(&geometry);

    let summary = run_in_process(&config, &options(dir.path(), 2))
        .await
        .expect("a worker failure is not fatal to the run");
    assert_eq!(summary.workers, 2);
    assert_eq!(summary.failed_workers, 1);
    assert_eq!(summary.items_served, 5);
    assert_eq!(summary.reports_written, 4);
    assert_eq!(summary.results_written, 4);
    assert_documents(dir.path());

    let results = read_json(&dir.path().join("results.out"));
    assert!(!results.contains_key("bad.fits[1]"));
}

#[test]
fn inspect_resolves_the_builtin_science_plan() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let geometry = populate(dir.path(), 1, 1);
    let pipeline = Pipeline::from_config(&config(&geometry)).expect("pipeline");

    let item = dir.path().join("frame0.fits").display().to_string();
    let (image, plan) = pipeline.inspect(&item).expect("inspect");
    assert_eq!(image.name, "frame0.fits[1]");
    assert_eq!(image.instrument, "VIS");
    assert_eq!(
        plan.check_names(),
        ["OVERSCAN", "SCIENCE STATS", "PIXELS BELOW ADC"]
    );
    assert_eq!(
        plan.report_names(),
        [
            "PRESCAN_REP",
            "POSTSCAN_REP",
            "SCIENCES_STATS_REP",
            "PIXELS_BELOW_ADC_REP"
        ]
    );
}
