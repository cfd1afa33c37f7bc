//! Single-writer sinks.
//!
//! A [`Sink`] owns one document and applies every pushed entry to it in
//! receive order, so concurrent producers never interleave output. It moves
//! `WaitingOpen -> Running -> Closed` and never leaves `Closed`.
//!
//! [`serve_sink`] feeds a sink from TCP connections. On the `END` frame it
//! stops accepting, drains every connection already accepted to
//! end-of-stream and only then closes the document.

use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{DocumentWriter, OutputError, SinkMessage};
use crate::distribution::protocol::{decode_result, read_frame, write_frame, ProtocolError, END};

/// Lifecycle of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Created; document not yet opened.
    WaitingOpen,
    /// Document open; entries are being written.
    Running,
    /// Document closed; terminal.
    Closed,
}

/// Sole writer of one document.
#[derive(Debug)]
pub struct Sink<W> {
    label: String,
    document: DocumentWriter<W>,
    state: SinkState,
}

impl<W: AsyncWrite + Unpin + Send> Sink<W> {
    /// Sink named `label` (for logs) writing `document`.
    pub fn new(label: impl Into<String>, document: DocumentWriter<W>) -> Self {
        Self {
            label: label.into(),
            document,
            state: SinkState::WaitingOpen,
        }
    }

    /// Current state.
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Open the document, write every received entry, and close on
    /// [`SinkMessage::End`] (or when every sender is gone). Returns the
    /// number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::InvalidState`] if the sink already ran, or any
    /// write failure.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<SinkMessage>) -> Result<usize, OutputError> {
        if self.state != SinkState::WaitingOpen {
            return Err(OutputError::InvalidState {
                state: self.state,
                operation: "run",
            });
        }
        self.document.open().await?;
        self.state = SinkState::Running;
        info!(sink = %self.label, "sink running");

        loop {
            match rx.recv().await {
                Some(SinkMessage::Data {
                    image_name,
                    payload,
                }) => {
                    debug!(sink = %self.label, image = %image_name, "writing entry");
                    self.document.write_entry(&image_name, payload).await?;
                }
                Some(SinkMessage::End) => break,
                None => {
                    warn!(sink = %self.label, "all producers gone before END; closing");
                    break;
                }
            }
        }

        self.document.close().await?;
        self.state = SinkState::Closed;
        info!(sink = %self.label, entries = self.document.entries(), "sink closed");
        Ok(self.document.entries())
    }

    /// Give back the document's writer.
    pub fn into_inner(self) -> W {
        self.document.into_inner()
    }
}

/// Feed `sink` from TCP producers on `listener` until an `END` frame
/// arrives, then drain and close. Returns the number of entries written.
///
/// # Errors
///
/// Returns an error if accepting fails or the document cannot be written.
pub async fn serve_sink<W>(
    listener: TcpListener,
    mut sink: Sink<W>,
    capacity: usize,
) -> Result<usize, OutputError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let label = sink.label.clone();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let writer = tokio::spawn(async move { sink.run(rx).await });

    let (end_tx, mut end_rx) = mpsc::channel::<()>(1);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(sink = %label, %peer, "producer connected");
                connections.spawn(forward(stream, peer, tx.clone(), end_tx.clone()));
            }
            Some(()) = end_rx.recv() => break,
        }
    }
    drop(listener);

    debug!(sink = %label, pending = connections.len(), "draining producers");
    while let Some(joined) = connections.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(sink = %label, error = %e, "producer connection failed"),
            Err(e) => warn!(sink = %label, error = %e, "producer task aborted"),
        }
    }

    // The writer only goes away after a write error, which the join reports.
    let _ = tx.send(SinkMessage::End).await;
    drop(tx);
    writer
        .await
        .map_err(|e| OutputError::Task(e.to_string()))?
}

/// Forward one producer's frames until end-of-stream or `END`.
async fn forward(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<SinkMessage>,
    end_tx: mpsc::Sender<()>,
) -> Result<(), ProtocolError> {
    let mut reader = BufReader::new(stream);
    while let Some(frame) = read_frame(&mut reader).await? {
        if frame == END {
            debug!(%peer, "end of stream requested");
            let _ = end_tx.try_send(());
            return Ok(());
        }
        match decode_result(&frame) {
            Ok((image_name, payload)) => {
                if tx
                    .send(SinkMessage::Data {
                        image_name,
                        payload,
                    })
                    .await
                    .is_err()
                {
                    return Err(ProtocolError::ConnectionClosed);
                }
            }
            Err(e) => warn!(%peer, error = %e, "dropping malformed result frame"),
        }
    }
    Ok(())
}

/// Ask the sink listening on `addr` to close.
///
/// # Errors
///
/// Returns an error if the sink cannot be reached.
pub async fn send_end_signal(addr: SocketAddr) -> Result<(), ProtocolError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, END).await?;
    stream.shutdown().await?;
    Ok(())
}
