//! Formatted documents over async writers.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{Formatter, Output, OutputError, Selector};
use crate::storage::Storage;

/// Order in which a document's entries are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryOrder {
    /// As they arrive.
    #[default]
    Arrival,
    /// Buffered and sorted by image name when the document closes.
    ImageName,
}

/// One formatted document written to `W`.
pub struct DocumentWriter<W> {
    writer: W,
    formatter: Box<dyn Formatter>,
    order: EntryOrder,
    buffered: Vec<(String, Value)>,
    entries: usize,
}

impl<W> std::fmt::Debug for DocumentWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWriter")
            .field("order", &self.order)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin + Send> DocumentWriter<W> {
    /// Document over `writer`.
    pub fn new(writer: W, formatter: Box<dyn Formatter>, order: EntryOrder) -> Self {
        Self {
            writer,
            formatter,
            order,
            buffered: Vec::new(),
            entries: 0,
        }
    }

    /// Write the prologue.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Io`] on write failure.
    pub async fn open(&mut self) -> Result<(), OutputError> {
        let prologue = self.formatter.open();
        self.write(&prologue).await
    }

    /// Add one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting or writing fails.
    pub async fn write_entry(&mut self, image_name: &str, payload: Value) -> Result<(), OutputError> {
        self.entries = self.entries.saturating_add(1);
        match self.order {
            EntryOrder::Arrival => self.emit(image_name, &payload).await,
            EntryOrder::ImageName => {
                self.buffered.push((image_name.to_owned(), payload));
                Ok(())
            }
        }
    }

    /// Flush buffered entries, write the epilogue and flush the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting or writing fails.
    pub async fn close(&mut self) -> Result<(), OutputError> {
        let mut buffered = std::mem::take(&mut self.buffered);
        buffered.sort_by(|a, b| a.0.cmp(&b.0));
        for (image_name, payload) in &buffered {
            self.emit(image_name, payload).await?;
        }
        let epilogue = self.formatter.close();
        self.write(&epilogue).await?;
        self.writer.flush().await?;
        debug!(entries = self.entries, "document closed");
        Ok(())
    }

    /// Entries received so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn emit(&mut self, image_name: &str, payload: &Value) -> Result<(), OutputError> {
        let text = self.formatter.format_data(image_name, payload)?;
        self.write(&text).await
    }

    async fn write(&mut self, text: &str) -> Result<(), OutputError> {
        self.writer.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

/// Output writing selected storage data into a formatted document.
#[derive(Debug)]
pub struct WriterOutput<W> {
    document: DocumentWriter<W>,
    selector: Selector,
}

/// Document written to a file.
pub type FileOutput = WriterOutput<tokio::fs::File>;

/// Document written to standard output.
pub type ConsoleOutput = WriterOutput<tokio::io::Stdout>;

impl<W: AsyncWrite + Unpin + Send> WriterOutput<W> {
    /// Output over `writer`.
    pub fn new(writer: W, formatter: Box<dyn Formatter>, selector: Selector, order: EntryOrder) -> Self {
        Self {
            document: DocumentWriter::new(writer, formatter, order),
            selector,
        }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.document.into_inner()
    }
}

impl FileOutput {
    /// Create (or truncate) `path` and write the document there.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Io`] if the file cannot be created.
    pub async fn create(
        path: &Path,
        formatter: Box<dyn Formatter>,
        selector: Selector,
        order: EntryOrder,
    ) -> Result<Self, OutputError> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(file, formatter, selector, order))
    }
}

impl ConsoleOutput {
    /// Write the document to standard output.
    pub fn console(formatter: Box<dyn Formatter>, selector: Selector, order: EntryOrder) -> Self {
        Self::new(tokio::io::stdout(), formatter, selector, order)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Output for WriterOutput<W> {
    async fn open(&mut self) -> Result<(), OutputError> {
        self.document.open().await
    }

    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError> {
        let (image_name, payload) = self.selector.select(storage);
        self.document.write_entry(image_name, payload).await
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        self.document.close().await
    }
}
