//! In-memory publish streams for tests.
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or in unit tests. Integration tests enable it through the dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! tidemq = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! [`channel_stream`] returns the two halves the handler consumes plus a
//! [`ClientEnd`] that plays the publisher.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::stream::{RequestStream, ResponseSink};
use crate::error::{Error, Result};
use crate::protocol::{DataMessage, InitMessage, PublishRequest, PublishResponse};
use crate::types::{Partition, Topic};

/// Create a connected request stream, response sink and client end.
pub fn channel_stream() -> (ChannelRequestStream, ChannelResponseSink, ClientEnd) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    (
        ChannelRequestStream { rx: request_rx },
        ChannelResponseSink { tx: response_tx },
        ClientEnd {
            requests: Some(request_tx),
            responses: response_rx,
        },
    )
}

pub struct ChannelRequestStream {
    rx: mpsc::UnboundedReceiver<Result<PublishRequest>>,
}

#[async_trait]
impl RequestStream for ChannelRequestStream {
    async fn recv(&mut self) -> Result<Option<PublishRequest>> {
        match self.rx.recv().await {
            Some(Ok(request)) => Ok(Some(request)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Fails with `BrokenPipe` once the [`ClientEnd`] is dropped.
pub struct ChannelResponseSink {
    tx: mpsc::UnboundedSender<PublishResponse>,
}

#[async_trait]
impl ResponseSink for ChannelResponseSink {
    async fn send(&mut self, response: &PublishResponse) -> Result<()> {
        self.tx
            .send(response.clone())
            .map_err(|_| Error::IoError(io::ErrorKind::BrokenPipe))
    }
}

/// The publisher side of an in-memory stream.
pub struct ClientEnd {
    requests: Option<mpsc::UnboundedSender<Result<PublishRequest>>>,
    responses: mpsc::UnboundedReceiver<PublishResponse>,
}

impl ClientEnd {
    /// Queue a request. False if the stream is closed or the server is gone.
    pub fn send(&self, request: impl Into<PublishRequest>) -> bool {
        self.push(Ok(request.into()))
    }

    pub fn send_init(&self, topic: Topic, partition: Partition, ack_interval: i32) -> bool {
        self.send(InitMessage::new(topic, partition, ack_interval))
    }

    pub fn send_data(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, ts_ns: i64) -> bool {
        self.send(DataMessage::new(key, value, ts_ns))
    }

    /// Make the server's next receive fail with `error`.
    pub fn fail(&self, error: Error) -> bool {
        self.push(Err(error))
    }

    fn push(&self, item: Result<PublishRequest>) -> bool {
        match &self.requests {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Close the request direction. The server sees a clean end of stream.
    pub fn close(&mut self) {
        self.requests = None;
    }

    /// Next response, or `None` once the server dropped its sink.
    pub async fn recv(&mut self) -> Option<PublishResponse> {
        self.responses.recv().await
    }

    /// Next response if one arrives within `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<PublishResponse> {
        tokio::time::timeout(wait, self.responses.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every remaining response, waiting until the server dropped its sink.
    pub async fn collect(&mut self) -> Vec<PublishResponse> {
        let mut received = Vec::new();
        while let Some(response) = self.responses.recv().await {
            received.push(response);
        }
        received
    }
}
