//! Per-image orchestration over a queue, with recording components.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use detqa::distribution::spawn_enumerator;
use detqa::image::supplier::ListSupplier;
use detqa::output::{ChannelOutput, Selector, SinkMessage};
use detqa::processor::{ProcessError, ProcessSummary, Processor};

use crate::components::{Components, SyntheticLoader};

fn drain(rx: &mut mpsc::Receiver<SinkMessage>) -> Vec<(String, Value)> {
    let mut entries = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let SinkMessage::Data {
            image_name,
            payload,
        } = message
        {
            entries.push((image_name, payload));
        }
    }
    entries
}

fn standard() -> Components {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .check("CHK_B", &["CHK_A"], true)
        .report("REP_1", Some("CHK_B"), &[]);
    components
}

#[tokio::test]
async fn empty_work_set_is_not_an_error() {
    let configurator = Arc::new(standard().configurator(&["REP_1"]));
    let (queue, _enumerator) = spawn_enumerator(Box::new(ListSupplier::new(Vec::<String>::new())), 4);
    let (tx, mut rx) = mpsc::channel(8);

    let mut processor = Processor::new(
        queue,
        SyntheticLoader,
        configurator,
        ChannelOutput::new(tx, Selector::Result),
    );
    let summary = processor.process().await.expect("process");
    assert_eq!(summary, ProcessSummary::default());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn checks_run_before_reports_and_each_image_is_flushed() {
    let configurator = Arc::new(standard().configurator(&["REP_1"]));
    let (queue, enumerator) =
        spawn_enumerator(Box::new(ListSupplier::new(["a", "skip@OTHER", "b"])), 4);
    let (result_tx, mut result_rx) = mpsc::channel(8);

    let mut processor = Processor::new(
        queue,
        SyntheticLoader,
        configurator,
        ChannelOutput::new(result_tx, Selector::Result),
    );
    let summary = processor.process().await.expect("process");
    assert_eq!(
        summary,
        ProcessSummary {
            processed: 2,
            skipped: 1
        }
    );
    drop(processor);
    assert_eq!(enumerator.await.expect("join"), 3);

    let entries = drain(&mut result_rx);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    for (_, payload) in &entries {
        assert_eq!(payload, &json!({"CHK_A": 0, "CHK_B": 1}));
    }
}

#[tokio::test]
async fn report_selector_sees_check_results() {
    let configurator = Arc::new(standard().configurator(&["REP_1"]));
    let (queue, _enumerator) = spawn_enumerator(Box::new(ListSupplier::new(["a"])), 4);
    let (tx, mut rx) = mpsc::channel(8);

    let mut processor = Processor::new(
        queue,
        SyntheticLoader,
        configurator,
        ChannelOutput::new(tx, Selector::Report),
    );
    processor.process().await.expect("process");

    let entries = drain(&mut rx);
    assert_eq!(
        entries,
        [(
            "a".to_owned(),
            json!({"REP_1": {"Result": "Nominal", "seen": true}})
        )]
    );
}

#[tokio::test]
async fn failing_check_aborts_without_flushing_the_image() {
    let mut components = Components::new();
    components
        .failing_check("CHK_BAD")
        .report("REP_BAD", Some("CHK_BAD"), &[]);
    let configurator = Arc::new(components.configurator(&["REP_BAD"]));
    let (queue, _enumerator) = spawn_enumerator(Box::new(ListSupplier::new(["a", "b"])), 4);
    let (tx, mut rx) = mpsc::channel(8);

    let mut processor = Processor::new(
        queue,
        SyntheticLoader,
        configurator,
        ChannelOutput::new(tx, Selector::Result),
    );
    match processor.process().await {
        Err(ProcessError::Component {
            image, component, ..
        }) => {
            assert_eq!(image, "a");
            assert_eq!(component, "CHK_BAD");
        }
        other => panic!("expected a component failure, got {other:?}"),
    }
    assert!(drain(&mut rx).is_empty());
}
