//! Per-image result records and the in-flight container that flushes them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::output::{Output, OutputError};

/// Measurements and verdicts accumulated for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    /// Image the record belongs to.
    pub image_name: String,
    /// Raw check results, keyed by result name.
    pub result: Map<String, Value>,
    /// Rendered report verdicts, keyed by report section.
    pub report: Map<String, Value>,
}

impl Storage {
    /// Empty record for `image_name`.
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            result: Map::new(),
            report: Map::new(),
        }
    }
}

/// Holds the storages of images still being processed and flushes them to
/// an [`Output`] one at a time.
///
/// At most one live record exists per in-flight image; a record is evicted
/// as soon as it has been written.
#[derive(Debug)]
pub struct ResultsContainer<O> {
    output: O,
    live: HashMap<String, Storage>,
}

impl<O: Output> ResultsContainer<O> {
    /// Wrap `output`. Call [`open`](Self::open) before the first dump.
    pub fn new(output: O) -> Self {
        Self {
            output,
            live: HashMap::new(),
        }
    }

    /// Open the underlying output.
    ///
    /// # Errors
    ///
    /// Propagates output failures.
    pub async fn open(&mut self) -> Result<(), OutputError> {
        self.output.open().await
    }

    /// Storage for `image_name`, created on first reference.
    pub fn get_storage(&mut self, image_name: &str) -> &mut Storage {
        self.live
            .entry(image_name.to_owned())
            .or_insert_with(|| Storage::new(image_name))
    }

    /// Write the storage of `image_name` and evict it.
    ///
    /// # Errors
    ///
    /// Propagates output failures. The record is evicted either way.
    pub async fn dump_storage(&mut self, image_name: &str) -> Result<(), OutputError> {
        let storage = self
            .live
            .remove(image_name)
            .unwrap_or_else(|| Storage::new(image_name));
        debug!(image = %image_name, "flushing storage");
        self.output.write_formatted(&storage).await
    }

    /// Drop the record of `image_name` without writing it.
    pub fn discard(&mut self, image_name: &str) {
        self.live.remove(image_name);
    }

    /// Number of records not yet flushed.
    pub fn in_flight(&self) -> usize {
        self.live.len()
    }

    /// Close the underlying output.
    ///
    /// # Errors
    ///
    /// Propagates output failures.
    pub async fn close(&mut self) -> Result<(), OutputError> {
        self.output.close().await
    }

    /// Give back the output.
    pub fn into_output(self) -> O {
        self.output
    }
}
