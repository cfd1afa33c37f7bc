//! The enumerator actor and its TCP front end.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::protocol::{read_frame, write_frame, END, NUMBER};
use super::{DistributionError, WorkSource};
use crate::image::supplier::Supplier;

/// Request handled by the enumerator.
#[derive(Debug)]
pub enum QueueRequest {
    /// Total item count.
    Number(oneshot::Sender<usize>),
    /// Next item, `None` once exhausted.
    Next(oneshot::Sender<Option<String>>),
}

/// Run `supplier` on a blocking thread, serving one request at a time.
///
/// The thread ends once every [`QueueHandle`] is dropped; the join handle
/// yields the number of items handed out.
pub fn spawn_enumerator(
    supplier: Box<dyn Supplier>,
    capacity: usize,
) -> (QueueHandle, JoinHandle<usize>) {
    let (tx, mut rx) = mpsc::channel::<QueueRequest>(capacity.max(1));
    let task = tokio::task::spawn_blocking(move || {
        let mut supplier = supplier;
        let mut served: usize = 0;
        while let Some(request) = rx.blocking_recv() {
            match request {
                QueueRequest::Number(reply) => {
                    let _ = reply.send(supplier.total());
                }
                QueueRequest::Next(reply) => {
                    let item = supplier.next_item();
                    if item.is_some() {
                        served = served.saturating_add(1);
                    }
                    let _ = reply.send(item);
                }
            }
        }
        debug!(served, "enumerator stopped");
        served
    });
    (QueueHandle { tx }, task)
}

/// In-process client of the enumerator.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueRequest>,
}

impl QueueHandle {
    async fn ask<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> QueueRequest,
    ) -> Result<T, DistributionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| DistributionError::QueueClosed)?;
        reply_rx.await.map_err(|_| DistributionError::QueueClosed)
    }
}

#[async_trait]
impl WorkSource for QueueHandle {
    async fn total(&mut self) -> Result<usize, DistributionError> {
        self.ask(QueueRequest::Number).await
    }

    async fn next_item(&mut self) -> Result<Option<String>, DistributionError> {
        self.ask(QueueRequest::Next).await
    }
}

/// TCP front end of the enumerator.
#[derive(Debug)]
pub struct WorkQueueServer {
    listener: TcpListener,
    handle: QueueHandle,
}

impl WorkQueueServer {
    /// Bind `addr` (port 0 picks a free port).
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Bind`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr, handle: QueueHandle) -> Result<Self, DistributionError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DistributionError::Bind { addr, source })?;
        Ok(Self { listener, handle })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, DistributionError> {
        self.listener
            .local_addr()
            .map_err(DistributionError::Accept)
    }

    /// Serve clients until the task is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Accept`] if the listener fails.
    pub async fn serve(self) -> Result<(), DistributionError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "work queue listening");
        }
        let mut clients = JoinSet::new();
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(DistributionError::Accept)?;
            debug!(%peer, "work queue client connected");
            clients.spawn(serve_client(stream, peer, self.handle.clone()));
            while let Some(done) = clients.try_join_next() {
                if let Ok(Err(e)) = done {
                    warn!(error = %e, "work queue client failed");
                }
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    mut handle: QueueHandle,
) -> Result<(), DistributionError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    while let Some(request) = read_frame(&mut reader).await? {
        let reply = if request == NUMBER {
            handle.total().await?.to_string()
        } else {
            handle
                .next_item()
                .await?
                .unwrap_or_else(|| END.to_owned())
        };
        debug!(%peer, %request, %reply, "work queue reply");
        write_frame(&mut write, &reply).await?;
    }
    Ok(())
}
