//! Stateful document serializers.
//!
//! A formatter produces one coherent document across a stream of entries:
//! [`open`](Formatter::open) yields the prologue,
//! [`format_data`](Formatter::format_data) one entry (with the separator
//! the previous entry needs) and [`close`](Formatter::close) the epilogue.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use super::OutputError;

/// Indentation unit of both document formats.
const INDENT: &str = "    ";

/// Serializer for a stream of `(image_name, payload)` entries.
pub trait Formatter: Send {
    /// Document prologue.
    fn open(&mut self) -> String;

    /// One entry, preceded by a separator when it is not the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    fn format_data(&mut self, image_name: &str, payload: &Value) -> Result<String, OutputError>;

    /// Document epilogue.
    fn close(&mut self) -> String;
}

/// Document format selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// Compact JSON, one entry per line.
    Json,
    /// JSON with 4-space indentation.
    PrettyJson,
    /// XML under a `<Results>` root.
    Xml,
}

impl FormatKind {
    /// Fresh formatter of this kind.
    pub fn build(self) -> Box<dyn Formatter> {
        match self {
            Self::Json => Box::new(JsonFormatter::new(false)),
            Self::PrettyJson => Box::new(JsonFormatter::new(true)),
            Self::Xml => Box::new(XmlFormatter::new()),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::PrettyJson => f.write_str("pretty-json"),
            Self::Xml => f.write_str("xml"),
        }
    }
}

// ── JSON ──

/// `{ "<name>": <payload>, ... }` with keys sorted inside every payload.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    pretty: bool,
    wrote_entry: bool,
}

impl JsonFormatter {
    /// Formatter; `pretty` indents payloads by four spaces.
    pub fn new(pretty: bool) -> Self {
        Self {
            pretty,
            wrote_entry: false,
        }
    }

    fn render(&self, payload: &Value) -> Result<String, OutputError> {
        if !self.pretty {
            return Ok(serde_json::to_string(payload)?);
        }
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT.as_bytes()));
        serde::Serialize::serialize(payload, &mut ser)?;
        String::from_utf8(buf).map_err(|e| {
            OutputError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

impl Formatter for JsonFormatter {
    fn open(&mut self) -> String {
        "{\n".to_owned()
    }

    fn format_data(&mut self, image_name: &str, payload: &Value) -> Result<String, OutputError> {
        let entry = format!(
            "{}: {}",
            serde_json::to_string(image_name)?,
            self.render(payload)?
        );
        let mut out = String::new();
        if self.wrote_entry {
            out.push_str(",\n");
        }
        self.wrote_entry = true;
        let lines: Vec<String> = entry.lines().map(|line| format!("{INDENT}{line}")).collect();
        out.push_str(&lines.join("\n"));
        Ok(out)
    }

    fn close(&mut self) -> String {
        if self.wrote_entry {
            "\n}\n".to_owned()
        } else {
            "}\n".to_owned()
        }
    }
}

// ── XML ──

/// `<Results>` document with one element per image and nested elements
/// for mappings; sequence items become `<value0>`, `<value1>`, ...
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormatter;

impl XmlFormatter {
    /// Formatter.
    pub fn new() -> Self {
        Self
    }
}

impl Formatter for XmlFormatter {
    fn open(&mut self) -> String {
        "<Results>\n".to_owned()
    }

    fn format_data(&mut self, image_name: &str, payload: &Value) -> Result<String, OutputError> {
        let mut out = String::new();
        element(&mut out, image_name, payload, 1);
        Ok(out)
    }

    fn close(&mut self) -> String {
        "</Results>\n".to_owned()
    }
}

fn element(out: &mut String, tag: &str, value: &Value, depth: usize) {
    let pad = INDENT.repeat(depth);
    out.push_str(&pad);
    out.push('<');
    out.push_str(tag);
    out.push('>');
    match value {
        Value::Object(map) => {
            out.push('\n');
            mapping(out, map, depth.saturating_add(1));
            out.push_str(&pad);
        }
        Value::Array(items) => {
            out.push('\n');
            for (i, item) in items.iter().enumerate() {
                element(out, &format!("value{i}"), item, depth.saturating_add(1));
            }
            out.push_str(&pad);
        }
        scalar => out.push_str(&escape(&scalar_text(scalar))),
    }
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

fn mapping(out: &mut String, map: &Map<String, Value>, depth: usize) {
    for (key, value) in map {
        element(out, key, value, depth);
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
