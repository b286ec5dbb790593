//! Messages of the publish stream and their frame encoding.
//!
//! Every message travels as a frame: a big-endian `u32` body length followed
//! by the body.
//!
//! ```text
//! Request body
//!   0x01 Init  namespace:str16 name:str16 ring_size:i32 range_start:i32
//!              range_stop:i32 unix_time_ns:i64 ack_interval:i32
//!   0x02 Data  key:bytes32 value:bytes32 ts_ns:i64
//!
//! Response body
//!   ack_sequence:i64 should_close:i8 error:bytes32
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    IResult,
    number::complete::{be_i32, be_i64, be_u8},
};
use nombytes::NomBytes;

use crate::constants::{FRAME_LENGTH_PREFIX_SIZE, FRAME_TAG_DATA, FRAME_TAG_INIT, MIN_ACK_INTERVAL};
use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::parser::{bytes_to_string, parse_bool, parse_bytes, parse_partition, parse_topic};
use crate::types::{Partition, Topic};

/// Handshake naming the partition a stream publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMessage {
    pub topic: Topic,
    pub partition: Partition,
    /// Number of Data messages per ack. Values below 1 mean 1.
    pub ack_interval: i32,
}

impl InitMessage {
    pub fn new(topic: Topic, partition: Partition, ack_interval: i32) -> Self {
        Self {
            topic,
            partition,
            ack_interval,
        }
    }

    /// Ack interval clamped to the smallest meaningful value.
    #[inline]
    pub fn effective_ack_interval(&self) -> i64 {
        self.ack_interval.max(MIN_ACK_INTERVAL) as i64
    }
}

/// One published message. The payload is opaque to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataMessage {
    pub key: Bytes,
    pub value: Bytes,
    pub ts_ns: i64,
}

impl DataMessage {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, ts_ns: i64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ts_ns,
        }
    }

    /// Payload bytes counted against throughput metrics.
    #[inline]
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishRequest {
    Init(InitMessage),
    Data(DataMessage),
}

impl PublishRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PublishRequest::Init(_) => "Init",
            PublishRequest::Data(_) => "Data",
        }
    }

    /// Decode a request from a frame body.
    pub fn decode(body: Bytes) -> Result<Self> {
        let (rest, request) = parse_publish_request(NomBytes::new(body.clone()))
            .map_err(|_| Error::ParsingError(body.clone()))?;
        if !rest.into_bytes().is_empty() {
            return Err(Error::ParsingError(body));
        }
        Ok(request)
    }
}

impl From<InitMessage> for PublishRequest {
    fn from(init: InitMessage) -> Self {
        PublishRequest::Init(init)
    }
}

impl From<DataMessage> for PublishRequest {
    fn from(data: DataMessage) -> Self {
        PublishRequest::Data(data)
    }
}

impl ToByte for InitMessage {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        FRAME_TAG_INIT.encode(buffer)?;
        self.topic.encode(buffer)?;
        self.partition.encode(buffer)?;
        self.ack_interval.encode(buffer)
    }
}

impl ToByte for DataMessage {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        FRAME_TAG_DATA.encode(buffer)?;
        self.key.encode(buffer)?;
        self.value.encode(buffer)?;
        self.ts_ns.encode(buffer)
    }
}

impl ToByte for PublishRequest {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        match self {
            PublishRequest::Init(init) => init.encode(buffer),
            PublishRequest::Data(data) => data.encode(buffer),
        }
    }
}

pub fn parse_publish_request(s: NomBytes) -> IResult<NomBytes, PublishRequest> {
    let (s, tag) = be_u8(s)?;
    match tag {
        FRAME_TAG_INIT => {
            let (s, topic) = parse_topic(s)?;
            let (s, partition) = parse_partition(s)?;
            let (s, ack_interval) = be_i32(s)?;
            Ok((
                s,
                PublishRequest::Init(InitMessage::new(topic, partition, ack_interval)),
            ))
        }
        FRAME_TAG_DATA => {
            let (s, key) = parse_bytes(s)?;
            let (s, value) = parse_bytes(s)?;
            let (s, ts_ns) = be_i64(s)?;
            Ok((s, PublishRequest::Data(DataMessage { key, value, ts_ns })))
        }
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// Server to client message.
///
/// The same shape carries the init acknowledgement, acks, heartbeats, the
/// close request and errors. A non-empty `error` ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishResponse {
    pub ack_sequence: i64,
    pub should_close: bool,
    pub error: String,
}

impl PublishResponse {
    /// Empty response acknowledging a successful handshake.
    pub fn accepted() -> Self {
        Self::default()
    }

    pub fn ack(ack_sequence: i64) -> Self {
        Self {
            ack_sequence,
            ..Self::default()
        }
    }

    pub fn close(ack_sequence: i64) -> Self {
        Self {
            ack_sequence,
            should_close: true,
            error: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Decode a response from a frame body.
    pub fn decode(body: Bytes) -> Result<Self> {
        let (rest, response) = parse_publish_response(NomBytes::new(body.clone()))
            .map_err(|_| Error::ParsingError(body.clone()))?;
        if !rest.into_bytes().is_empty() {
            return Err(Error::ParsingError(body));
        }
        Ok(response)
    }
}

impl ToByte for PublishResponse {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.ack_sequence.encode(buffer)?;
        self.should_close.encode(buffer)?;
        self.error.as_bytes().encode(buffer)
    }
}

pub fn parse_publish_response(s: NomBytes) -> IResult<NomBytes, PublishResponse> {
    let (s, ack_sequence) = be_i64(s)?;
    let (s, should_close) = parse_bool(s)?;
    let (s, error) = parse_bytes(s)?;
    let error = bytes_to_string(&error)?;
    Ok((
        s,
        PublishResponse {
            ack_sequence,
            should_close,
            error,
        },
    ))
}

/// Encode a message as a complete frame, length prefix included.
pub fn encode_frame<M: ToByte + ?Sized>(message: &M) -> Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(64);
    buffer.put_u32(0);
    message.encode(&mut buffer)?;
    let body_len = buffer.len() - FRAME_LENGTH_PREFIX_SIZE;
    let body_len = u32::try_from(body_len).map_err(|_| {
        Error::Encoding(format!("frame body of {} bytes is too large", body_len))
    })?;
    buffer[..FRAME_LENGTH_PREFIX_SIZE].copy_from_slice(&body_len.to_be_bytes());
    Ok(buffer.freeze())
}
