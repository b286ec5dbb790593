//! Transport-neutral halves of a publish stream.
//!
//! The publish handler never touches sockets. It reads [`PublishRequest`]s
//! from a [`RequestStream`] and writes [`PublishResponse`]s to a
//! [`ResponseSink`]. TCP framing lives in [`super::connection`]; the
//! in-memory pair used by tests lives in `server::testing`.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{PublishRequest, PublishResponse};

/// Inbound half of a publish stream.
#[async_trait]
pub trait RequestStream: Send {
    /// Next request, or `Ok(None)` once the client closed the stream cleanly.
    async fn recv(&mut self) -> Result<Option<PublishRequest>>;
}

/// Outbound half of a publish stream.
///
/// Owned by the session's outbound task for its whole life, hence `'static`.
#[async_trait]
pub trait ResponseSink: Send + 'static {
    async fn send(&mut self, response: &PublishResponse) -> Result<()>;
}

/// Per-stream facts the handler needs beyond the messages themselves.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Client network address, used to build session ids.
    pub peer_addr: String,
}

impl StreamContext {
    pub fn new(peer_addr: impl Into<String>) -> Self {
        Self {
            peer_addr: peer_addr.into(),
        }
    }
}
