//! Which part of a [`Storage`] an output emits.

use serde_json::Value;

use crate::storage::Storage;

/// Picks a sub-structure of a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The raw check results.
    Result,
    /// The report verdicts.
    Report,
}

impl Selector {
    /// Image name and the selected mapping.
    pub fn select<'a>(&self, storage: &'a Storage) -> (&'a str, Value) {
        let data = match self {
            Self::Result => &storage.result,
            Self::Report => &storage.report,
        };
        (&storage.image_name, Value::Object(data.clone()))
    }
}
