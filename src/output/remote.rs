//! Outputs that push selected payloads to a sink instead of writing them.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Output, OutputError, Selector};
use crate::distribution::protocol::{encode_result, write_frame};
use crate::storage::Storage;

/// Message carried from workers to an in-process sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    /// One image's selected payload.
    Data {
        /// Image name.
        image_name: String,
        /// Selected sub-structure.
        payload: Value,
    },
    /// End of stream; the sink closes its document.
    End,
}

/// Pushes result frames over TCP to a sink process.
#[derive(Debug)]
pub struct SocketOutput {
    addr: SocketAddr,
    selector: Selector,
    stream: Option<BufWriter<TcpStream>>,
}

impl SocketOutput {
    /// Output pushing to the sink listening on `addr`.
    pub fn new(addr: SocketAddr, selector: Selector) -> Self {
        Self {
            addr,
            selector,
            stream: None,
        }
    }

    async fn stream(&mut self) -> Result<&mut BufWriter<TcpStream>, OutputError> {
        if self.stream.is_none() {
            debug!(sink = %self.addr, "connecting to sink");
            let stream = TcpStream::connect(self.addr).await?;
            self.stream = Some(BufWriter::new(stream));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| OutputError::Io(std::io::ErrorKind::NotConnected.into()))
    }
}

#[async_trait]
impl Output for SocketOutput {
    async fn open(&mut self) -> Result<(), OutputError> {
        self.stream().await?;
        Ok(())
    }

    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError> {
        let (image_name, payload) = self.selector.select(storage);
        let frame = encode_result(image_name, &payload)?;
        write_frame(self.stream().await?, &frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush().await?;
            stream.shutdown().await?;
        }
        Ok(())
    }
}

/// Pushes selected payloads into an in-process sink channel.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    tx: mpsc::Sender<SinkMessage>,
    selector: Selector,
}

impl ChannelOutput {
    /// Output sending to `tx`.
    pub fn new(tx: mpsc::Sender<SinkMessage>, selector: Selector) -> Self {
        Self { tx, selector }
    }
}

#[async_trait]
impl Output for ChannelOutput {
    async fn open(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    async fn write_formatted(&mut self, storage: &Storage) -> Result<(), OutputError> {
        let (image_name, payload) = self.selector.select(storage);
        self.tx
            .send(SinkMessage::Data {
                image_name: image_name.to_owned(),
                payload,
            })
            .await
            .map_err(|_| OutputError::ChannelClosed)
    }

    async fn close(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}
