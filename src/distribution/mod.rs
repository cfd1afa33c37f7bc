//! Work distribution: one enumerator, many pulling workers.
//!
//! The enumerator owns the [`Supplier`](crate::image::supplier::Supplier)
//! and hands out exactly one item per request, so items reach workers at
//! most once in first-come order. Workers see it through [`WorkSource`]:
//! in-process via [`QueueHandle`], across processes via
//! [`RemoteWorkSource`] talking to a [`WorkQueueServer`].

pub mod client;
pub mod protocol;
pub mod server;

use async_trait::async_trait;
use thiserror::Error;

pub use client::RemoteWorkSource;
pub use protocol::ProtocolError;
pub use server::{spawn_enumerator, QueueHandle, QueueRequest, WorkQueueServer};

/// Errors raised while pulling work.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// Talking to a remote queue failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The enumerator has shut down.
    #[error("work queue closed")]
    QueueClosed,

    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: std::net::SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
}

/// Finite, non-restartable stream of work-item identifiers.
#[async_trait]
pub trait WorkSource: Send {
    /// Total number of items in the work set.
    async fn total(&mut self) -> Result<usize, DistributionError>;

    /// Next unconsumed item; `None` once the work set is exhausted.
    async fn next_item(&mut self) -> Result<Option<String>, DistributionError>;
}
