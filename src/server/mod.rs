//! Publish stream server.
//!
//! [`BrokerServer`] accepts TCP connections and runs one publish stream per
//! connection through a shared [`PublishHandler`].
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use object_store::memory::InMemory;
//! use tidemq::cluster::{
//!     AssignmentReader, InMemoryLogFactory, LocalPartitionRegistry, PartitionManager,
//!     PublishConfig,
//! };
//! use tidemq::server::{BrokerServer, PublishHandler};
//! use tidemq::types::BrokerAddress;
//!
//! #[tokio::main]
//! async fn main() {
//!     let assignments = AssignmentReader::new(Arc::new(InMemory::new()), "topics");
//!     let manager = PartitionManager::new(
//!         BrokerAddress::from("127.0.0.1:17777"),
//!         Arc::new(LocalPartitionRegistry::new()),
//!         Arc::new(assignments),
//!         Arc::new(InMemoryLogFactory::new()),
//!     );
//!     let handler = PublishHandler::new(Arc::new(manager), PublishConfig::default());
//!     let server = BrokerServer::new("127.0.0.1:17777", handler).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

mod connection;
pub mod health;
mod publish;
mod stream;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testing;

pub use connection::{FrameReader, FrameWriter, serve_connection};
pub use publish::PublishHandler;
pub use stream::{RequestStream, ResponseSink, StreamContext};

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::cluster::BrokerError;
use crate::cluster::metrics;
use crate::constants::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_TOTAL_CONNECTIONS};
use crate::error::{Error, Result};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// TCP server for publish streams with graceful shutdown support.
pub struct BrokerServer {
    listener: TcpListener,
    handler: Arc<PublishHandler>,
    shutdown_tx: broadcast::Sender<()>,
    /// Raised by `shutdown`; readiness probes report not ready once set.
    shutting_down: Arc<AtomicBool>,
    /// Open publish connections, decremented by [`ConnectionSlot`].
    active_connections: Arc<AtomicUsize>,
    /// 0 disables the limit.
    max_total_connections: usize,
    max_frame_size: usize,
}

impl BrokerServer {
    /// Create a server bound to `addr` with default limits.
    pub async fn new(addr: &str, handler: PublishHandler) -> Result<Self> {
        Self::with_config(
            addr,
            Arc::new(handler),
            DEFAULT_MAX_TOTAL_CONNECTIONS,
            DEFAULT_MAX_FRAME_SIZE,
        )
        .await
    }

    /// Create a server with custom limits.
    ///
    /// # Arguments
    /// * `addr` - Address to bind to (e.g., "0.0.0.0:17777")
    /// * `handler` - Publish stream handler shared by all connections
    /// * `max_total_connections` - Maximum concurrent connections (0 = unlimited)
    /// * `max_frame_size` - Largest accepted request frame body
    pub async fn with_config(
        addr: &str,
        handler: Arc<PublishHandler>,
        max_total_connections: usize,
        max_frame_size: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(
            addr = %addr,
            broker = %handler.partitions().self_address(),
            max_total = max_total_connections,
            "Broker listening for publishers"
        );

        Ok(Self {
            listener,
            handler,
            shutdown_tx,
            shutting_down: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_total_connections,
            max_frame_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::IoError(e.kind()))
    }

    pub fn handler(&self) -> &Arc<PublishHandler> {
        &self.handler
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Flag shared with the health server's readiness probe.
    pub fn shutting_down_flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }

    /// Stop accepting connections. Open streams run until their clients close.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        tracing::info!("Shutdown signal sent");
    }

    /// Stop accepting and wait up to `timeout` for open streams to finish.
    ///
    /// True if every connection closed in time.
    pub async fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let drained = tokio::time::timeout(timeout, async {
            let mut poll = tokio::time::interval(DRAIN_POLL_INTERVAL);
            loop {
                poll.tick().await;
                let active = self.active_connections();
                if active == 0 {
                    return;
                }
                tracing::debug!(active_connections = active, "Waiting for publishers to finish");
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining_connections = self.active_connections(),
                "Shutdown timeout, publish streams still open"
            );
        }
        drained
    }

    /// Reserve a connection slot, or `None` when the global limit is reached.
    fn try_reserve(&self) -> Option<ConnectionSlot> {
        let limit = self.max_total_connections;
        self.active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (limit == 0 || current < limit).then_some(current + 1)
            })
            .ok()
            .map(|_| ConnectionSlot(self.active_connections.clone()))
    }

    /// Accept connections until a shutdown signal is received.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("No longer accepting publish streams");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted.map_err(|e| Error::IoError(e.kind()))?,
            };

            let Some(slot) = self.try_reserve() else {
                tracing::warn!(
                    client_addr = %addr,
                    max_connections = self.max_total_connections,
                    "Connection limit reached, rejecting publisher"
                );
                metrics::TOTAL_CONNECTIONS.with_label_values(&["rejected"]).inc();
                drop(stream);
                continue;
            };
            tracing::debug!(client_addr = %addr, "Accepted connection");

            let handler = self.handler.clone();
            let max_frame_size = self.max_frame_size;
            tokio::spawn(async move {
                let _slot = slot;
                match serve_connection(stream, addr, handler, max_frame_size).await {
                    Ok(()) => {}
                    Err(BrokerError::StreamIo(e)) if e.is_disconnect() => {
                        tracing::debug!(client_addr = %addr, error = %e, "Publisher disconnected");
                    }
                    Err(e) => {
                        tracing::warn!(client_addr = %addr, error = %e, "Publish stream ended with error");
                    }
                }
            });
        }
    }

    /// Serve a single connection on the calling task (useful for testing).
    pub async fn accept_one(&self) -> std::result::Result<(), BrokerError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| BrokerError::StreamIo(Error::IoError(e.kind())))?;

        tracing::debug!(client_addr = %addr, "Accepted connection");
        serve_connection(stream, addr, self.handler.clone(), self.max_frame_size).await
    }
}

/// Counts one open connection until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
