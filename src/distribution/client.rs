//! Worker-side client of the TCP work queue.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::protocol::{parse_count, read_frame, write_frame, ProtocolError, END, NEXT, NUMBER};
use super::{DistributionError, WorkSource};

/// Pulls items from a [`WorkQueueServer`](super::WorkQueueServer).
///
/// Connects on first use. Once `END` arrives the connection is dropped and
/// every later call returns `None` without touching the network.
#[derive(Debug)]
pub struct RemoteWorkSource {
    addr: SocketAddr,
    conn: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
    exhausted: bool,
}

impl RemoteWorkSource {
    /// Client for the queue at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            conn: None,
            exhausted: false,
        }
    }

    async fn request(&mut self, frame: &str) -> Result<String, ProtocolError> {
        if self.conn.is_none() {
            debug!(queue = %self.addr, "connecting to work queue");
            let (read, write) = TcpStream::connect(self.addr).await?.into_split();
            self.conn = Some((BufReader::new(read), write));
        }
        let (reader, writer) = self.conn.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        write_frame(writer, frame).await?;
        read_frame(reader)
            .await?
            .ok_or(ProtocolError::ConnectionClosed)
    }
}

#[async_trait]
impl WorkSource for RemoteWorkSource {
    async fn total(&mut self) -> Result<usize, DistributionError> {
        let reply = self.request(NUMBER).await?;
        Ok(parse_count(&reply)?)
    }

    async fn next_item(&mut self) -> Result<Option<String>, DistributionError> {
        if self.exhausted {
            return Ok(None);
        }
        let reply = self.request(NEXT).await?;
        if reply == END {
            self.exhausted = true;
            self.conn = None;
            return Ok(None);
        }
        Ok(Some(reply))
    }
}
