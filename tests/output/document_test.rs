//! Documents written through selectors and formatters.

use serde_json::{json, Value};

use detqa::output::{
    DocumentWriter, EntryOrder, FormatKind, JsonFormatter, Output, Selector, WriterOutput,
};
use detqa::storage::Storage;

fn measured(name: &str) -> Storage {
    let mut storage = Storage::new(name);
    storage.result.insert(
        "Over-Scan".to_owned(),
        json!({"average": [1.5, 2.25, -0.125], "median": [1, 2, 3], "var": [0.0, 0.0, 0.0]}),
    );
    storage.result.insert(
        "ScienceStats".to_owned(),
        json!({"average": 1234.5678, "median": 1200, "var": 1.0e-9, "zeros": false}),
    );
    storage
        .report
        .insert("Over-Scan".to_owned(), json!({"Result": "Nominal"}));
    storage
}

async fn render(kind: FormatKind, selector: Selector, storages: &[Storage]) -> String {
    let mut output = WriterOutput::new(Vec::new(), kind.build(), selector, EntryOrder::Arrival);
    output.open().await.expect("open");
    for storage in storages {
        output.write_formatted(storage).await.expect("write");
    }
    output.close().await.expect("close");
    String::from_utf8(output.into_inner()).expect("utf8")
}

#[tokio::test]
async fn result_mapping_survives_a_json_round_trip() {
    let storages = [measured("img[1]"), measured("img[2]")];
    for kind in [FormatKind::Json, FormatKind::PrettyJson] {
        let text = render(kind, Selector::Result, &storages).await;
        let doc: Value = serde_json::from_str(&text).expect("valid json");
        for storage in &storages {
            assert_eq!(
                doc[storage.image_name.as_str()],
                Value::Object(storage.result.clone()),
                "{kind} lost information"
            );
        }
    }
}

#[tokio::test]
async fn report_selector_emits_only_verdicts() {
    let text = render(FormatKind::PrettyJson, Selector::Report, &[measured("img[1]")]).await;
    let doc: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(doc, json!({"img[1]": {"Over-Scan": {"Result": "Nominal"}}}));
    assert!(text.contains("\n            \"Result\": \"Nominal\"\n"));
}

#[tokio::test]
async fn empty_document_is_still_well_formed() {
    assert_eq!(render(FormatKind::Json, Selector::Result, &[]).await, "{\n}\n");
    assert_eq!(
        render(FormatKind::Xml, Selector::Result, &[]).await,
        "<Results>\n</Results>\n"
    );
}

#[tokio::test]
async fn xml_document_nests_results() {
    let text = render(FormatKind::Xml, Selector::Report, &[measured("img")]).await;
    assert_eq!(
        text,
        "<Results>\n    <img>\n        <Over-Scan>\n            <Result>Nominal</Result>\n        </Over-Scan>\n    </img>\n</Results>\n"
    );
}

#[tokio::test]
async fn image_name_order_sorts_at_close() {
    let mut writer = DocumentWriter::new(
        Vec::new(),
        Box::new(JsonFormatter::new(false)),
        EntryOrder::ImageName,
    );
    writer.open().await.expect("open");
    for name in ["c", "a", "b"] {
        writer.write_entry(name, json!(1)).await.expect("write");
    }
    writer.close().await.expect("close");
    assert_eq!(writer.entries(), 3);
    let text = String::from_utf8(writer.into_inner()).expect("utf8");
    assert_eq!(text, "{\n    \"a\": 1,\n    \"b\": 1,\n    \"c\": 1\n}\n");
}
