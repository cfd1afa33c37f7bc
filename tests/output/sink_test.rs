//! TCP sinks fed by socket outputs.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use detqa::output::{
    send_end_signal, serve_sink, DocumentWriter, EntryOrder, JsonFormatter, Output, OutputError,
    Selector, Sink, SocketOutput,
};
use detqa::storage::Storage;

async fn start_sink(path: &Path) -> (std::net::SocketAddr, JoinHandle<Result<usize, OutputError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let file = tokio::fs::File::create(path).await.expect("create");
    let sink = Sink::new(
        "report",
        DocumentWriter::new(file, Box::new(JsonFormatter::new(false)), EntryOrder::Arrival),
    );
    (addr, tokio::spawn(serve_sink(listener, sink, 8)))
}

fn storage(name: &str, value: i64) -> Storage {
    let mut storage = Storage::new(name);
    storage
        .report
        .insert("Over-Scan".to_owned(), json!({"Result": "Nominal", "n": value}));
    storage
}

#[tokio::test]
async fn sink_writes_every_pushed_image_then_closes_once() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("report.out");
    let (addr, sink) = start_sink(&path).await;

    let mut producers = Vec::new();
    for (name, value) in [("b", 2), ("a", 1)] {
        producers.push(tokio::spawn(async move {
            let mut output = SocketOutput::new(addr, Selector::Report);
            output.open().await.expect("open");
            output.write_formatted(&storage(name, value)).await.expect("write");
            output.close().await.expect("close");
        }));
    }
    for producer in producers {
        producer.await.expect("join");
    }

    send_end_signal(addr).await.expect("end");
    assert_eq!(sink.await.expect("join").expect("sink"), 2);

    let text = std::fs::read_to_string(&path).expect("read");
    assert!(text.starts_with("{\n"));
    assert!(text.ends_with("\n}\n"));
    assert_eq!(text.matches("\n}\n").count(), 1);
    assert_eq!(text.matches(",\n").count(), 1);
    let doc: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(doc["a"]["Over-Scan"]["n"], 1);
    assert_eq!(doc["b"]["Over-Scan"]["n"], 2);
    assert_eq!(doc.as_object().map(|m| m.len()), Some(2));
}

#[tokio::test]
async fn end_waits_for_connected_producers_to_finish() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("report.out");
    let (addr, sink) = start_sink(&path).await;

    let mut slow = TcpStream::connect(addr).await.expect("connect");
    slow.write_all(b"early%::%{\"k\":1}\n").await.expect("write");

    send_end_signal(addr).await.expect("end");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sink.is_finished(), "sink must wait for the open producer");

    slow.write_all(b"late%::%{\"k\":2}\n").await.expect("write");
    slow.shutdown().await.expect("shutdown");
    drop(slow);

    assert_eq!(sink.await.expect("join").expect("sink"), 2);
    let doc: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(doc["early"]["k"], 1);
    assert_eq!(doc["late"]["k"], 2);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("report.out");
    let (addr, sink) = start_sink(&path).await;

    let mut producer = TcpStream::connect(addr).await.expect("connect");
    producer
        .write_all(b"no separator here\nok%::%[1,2]\n")
        .await
        .expect("write");
    producer.shutdown().await.expect("shutdown");
    drop(producer);

    send_end_signal(addr).await.expect("end");
    assert_eq!(sink.await.expect("join").expect("sink"), 1);
    let doc: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(doc["ok"], json!([1, 2]));
}
