//! Result fan-in: selectors, formatters, outputs and sinks.
//!
//! An [`Output`] takes finished [`Storage`] records. Local outputs select a
//! sub-structure and write it through a [`Formatter`]; remote outputs push
//! the selected payload to a [`Sink`], which is the only writer of its
//! document.

pub mod formatter;
pub mod remote;
pub mod selector;
pub mod sink;
pub mod writer;

use async_trait::async_trait;
use thiserror::Error;

use crate::distribution::protocol::ProtocolError;
use crate::storage::Storage;

pub use formatter::{FormatKind, Formatter, JsonFormatter, XmlFormatter};
pub use remote::{ChannelOutput, SinkMessage, SocketOutput};
pub use selector::Selector;
pub use sink::{send_end_signal, serve_sink, Sink, SinkState};
pub use writer::{ConsoleOutput, DocumentWriter, EntryOrder, FileOutput, WriterOutput};

/// Errors raised by outputs, formatters and sinks.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Writing the destination failed.
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be serialized.
    #[error("output JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pushing to a remote sink failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The receiving side of an in-process channel is gone.
    #[error("sink channel closed")]
    ChannelClosed,

    /// An operation was attempted in the wrong sink state.
    #[error("sink is {state:?}, cannot {operation}")]
    InvalidState {
        /// State the sink was in.
        state: SinkState,
        /// What was attempted.
        operation: &'static str,
    },

    /// The sink's writer task did not complete.
    #[error("sink task failed: {0}")]
    Task(String),
}

/// Destination for finished storages.
#[async_trait]
pub trait Output: Send {
    /// Prepare the destination (write the envelope prologue, connect, ...).
    async fn open(&mut self) -> Result<(), OutputError>;

    /// Write the selected part of `storage`.
    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError>;

    /// Finish the destination (write the epilogue, disconnect, ...).
    async fn close(&mut self) -> Result<(), OutputError>;
}

#[async_trait]
impl<O: Output + ?Sized> Output for Box<O> {
    async fn open(&mut self) -> Result<(), OutputError> {
        (**self).open().await
    }

    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError> {
        (**self).write_formatted(storage).await
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        (**self).close().await
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

#[async_trait]
impl Output for NullOutput {
    async fn open(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    async fn write_formatted(&mut self, _storage: &Storage) -> Result<(), OutputError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Fans every call out to several outputs, in insertion order.
#[derive(Default)]
pub struct OutputComposite {
    outputs: Vec<Box<dyn Output>>,
}

impl std::fmt::Debug for OutputComposite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputComposite")
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl OutputComposite {
    /// Composite of `outputs`.
    pub fn new(outputs: Vec<Box<dyn Output>>) -> Self {
        Self { outputs }
    }

    /// Append another output.
    pub fn add(&mut self, output: Box<dyn Output>) {
        self.outputs.push(output);
    }

    /// Number of member outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether there are no member outputs.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[async_trait]
impl Output for OutputComposite {
    async fn open(&mut self) -> Result<(), OutputError> {
        for output in &mut self.outputs {
            output.open().await?;
        }
        Ok(())
    }

    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError> {
        for output in &mut self.outputs {
            output.write_formatted(storage).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        for output in &mut self.outputs {
            output.close().await?;
        }
        Ok(())
    }
}
