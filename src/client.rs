//! Minimal publish client.
//!
//! Speaks the framed publish protocol over one TCP connection. Responses are
//! not read in the background; call [`PublishClient::recv_response`] to
//! consume acks and heartbeats.
//!
//! ```rust,no_run
//! use tidemq::client::PublishClient;
//! use tidemq::types::{Partition, Topic};
//!
//! # async fn run() -> tidemq::error::Result<()> {
//! let mut client = PublishClient::connect("127.0.0.1:17777").await?;
//! let accepted = client
//!     .init(Topic::new("chat", "rooms"), Partition::new(1024, 0, 1024, 0), 10)
//!     .await?;
//! assert!(!accepted.is_error());
//! client.publish("user-1", "hello", 0).await?;
//! let responses = client.close().await?;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::constants::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Error, Result};
use crate::protocol::{DataMessage, InitMessage, PublishRequest, PublishResponse};
use crate::server::{FrameReader, FrameWriter};
use crate::types::{Partition, Topic};

pub struct PublishClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl PublishClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::IoError(e.kind()))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE),
            writer: FrameWriter::new(write_half),
        })
    }

    /// Send the handshake and wait for the broker's answer.
    ///
    /// The returned response carries an error when the broker refused the
    /// partition; the broker closes the stream right after.
    pub async fn init(
        &mut self,
        topic: Topic,
        partition: Partition,
        ack_interval: i32,
    ) -> Result<PublishResponse> {
        let init = PublishRequest::from(InitMessage::new(topic, partition, ack_interval));
        self.writer.write_frame(&init).await?;
        self.recv_response()
            .await?
            .ok_or_else(|| Error::MissingData("Connection closed before init response".to_owned()))
    }

    pub async fn publish(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ts_ns: i64,
    ) -> Result<()> {
        let data = PublishRequest::from(DataMessage::new(key, value, ts_ns));
        self.writer.write_frame(&data).await
    }

    /// Next response, `None` once the broker closed the stream.
    pub async fn recv_response(&mut self) -> Result<Option<PublishResponse>> {
        match self.reader.read_frame().await? {
            Some(body) => PublishResponse::decode(body).map(Some),
            None => Ok(None),
        }
    }

    /// Finish publishing and collect the responses still in flight.
    pub async fn close(mut self) -> Result<Vec<PublishResponse>> {
        self.writer.shutdown().await?;
        let mut responses = Vec::new();
        while let Some(response) = self.recv_response().await? {
            responses.push(response);
        }
        Ok(responses)
    }
}
