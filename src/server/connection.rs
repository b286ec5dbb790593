//! TCP transport of publish streams.
//!
//! Each direction of a connection is a sequence of frames: a big-endian
//! `u32` body length followed by the body. The read half decodes requests,
//! the write half encodes responses, and the two are driven independently
//! by the publish handler.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::publish::PublishHandler;
use super::stream::{RequestStream, ResponseSink, StreamContext};
use crate::cluster::BrokerResult;
use crate::cluster::metrics;
use crate::constants::FRAME_LENGTH_PREFIX_SIZE;
use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::protocol::{PublishRequest, PublishResponse, encode_frame};

fn track_connection_open() {
    metrics::ACTIVE_CONNECTIONS.inc();
    metrics::TOTAL_CONNECTIONS
        .with_label_values(&["accepted"])
        .inc();
}

fn track_connection_close() {
    metrics::ACTIVE_CONNECTIONS.dec();
}

/// Reads length-prefixed frames from the inbound half of a connection.
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Next frame body. `Ok(None)` when the peer closed between frames.
    ///
    /// A length above the limit is rejected before the body is allocated.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let mut size_buf = [0u8; FRAME_LENGTH_PREFIX_SIZE];
        if let Err(e) = self.inner.read_exact(&mut size_buf).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(Error::IoError(e.kind()));
        }

        let size = u32::from_be_bytes(size_buf) as usize;
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let mut data = vec![0u8; size];
        if let Err(e) = self.inner.read_exact(&mut data).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(Error::MissingData(
                    "Connection closed mid-frame".to_owned(),
                ));
            }
            return Err(Error::IoError(e.kind()));
        }

        trace!(size, "Read frame");
        Ok(Some(Bytes::from(data)))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> RequestStream for FrameReader<R> {
    async fn recv(&mut self) -> Result<Option<PublishRequest>> {
        match self.read_frame().await? {
            Some(body) => PublishRequest::decode(body).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes length-prefixed frames to the outbound half of a connection.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame<M: ToByte + Sync + ?Sized>(&mut self, message: &M) -> Result<()> {
        let frame = encode_frame(message)?;
        self.inner
            .write_all(&frame)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| Error::IoError(e.kind()))?;
        trace!(size = frame.len(), "Wrote frame");
        Ok(())
    }

    /// Flush and close the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::IoError(e.kind()))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> ResponseSink for FrameWriter<W> {
    async fn send(&mut self, response: &PublishResponse) -> Result<()> {
        self.write_frame(response).await
    }
}

/// Run one publish stream over an accepted TCP connection.
pub async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<PublishHandler>,
    max_frame_size: usize,
) -> BrokerResult<()> {
    track_connection_open();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let requests = FrameReader::new(read_half, max_frame_size);
    let responses = FrameWriter::new(write_half);
    let ctx = StreamContext::new(addr.to_string());

    let result = handler.handle(&ctx, requests, responses).await;
    track_connection_close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataMessage, InitMessage};
    use crate::types::{Partition, Topic};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_cross_a_pipe() {
        let (client, server) = duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        let init = PublishRequest::from(InitMessage::new(
            Topic::new("chat", "rooms"),
            Partition::new(1024, 0, 512, 7),
            2,
        ));
        let data = PublishRequest::from(DataMessage::new("k", "v", 5));
        writer.write_frame(&init).await.unwrap();
        writer.write_frame(&data).await.unwrap();
        drop(writer);

        assert_eq!(reader.recv().await.unwrap(), Some(init));
        assert_eq!(reader.recv().await.unwrap(), Some(data));
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server, 16);
        client.write_all(&1000u32.to_be_bytes()).await.unwrap();

        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err, Error::FrameTooLarge { size: 1000, max: 16 });
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_an_error() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server, 64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_parsing_error() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server, 64);
        client.write_all(&1u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0x7f]).await.unwrap();

        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, Error::ParsingError(_)));
    }

    #[tokio::test]
    async fn test_response_sink_writes_decodable_frames() {
        let (client, server) = duplex(256);
        let mut sink = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 256);

        sink.send(&PublishResponse::ack(9)).await.unwrap();
        let body = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(PublishResponse::decode(body).unwrap(), PublishResponse::ack(9));
    }
}
