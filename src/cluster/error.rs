//! Errors raised by partition activation and publish sessions.
//!
//! # Terminal vs. logged
//!
//! Handshake and activation failures (`MissingInit`, `PartitionNotFound`,
//! `PartitionNotAssigned`, `MetadataUnreachable`, `MetadataMalformed`) end the
//! session after one best-effort error response. `SendFailed` is only logged
//! and counted; the outbound task keeps running.
//!
//! Nothing in this layer retries. A failed activation is re-attempted only
//! when the next stream for the partition arrives.

use thiserror::Error;

use crate::error::Error;
use crate::types::{BrokerAddress, Partition, Topic};

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The first message on a publish stream was not an Init.
    #[error("missing init message")]
    MissingInit,

    /// No assignment document exists for the topic.
    #[error("read topic {topic} conf: {path} not found")]
    PartitionNotFound { topic: Topic, path: String },

    /// The assignment exists but this broker does not lead the partition.
    #[error("topic {topic} partition {partition} not assigned to broker {broker}")]
    PartitionNotAssigned {
        topic: Topic,
        partition: Partition,
        broker: BrokerAddress,
    },

    /// The metadata store could not be reached.
    #[error("metadata store unreachable: {0}")]
    MetadataUnreachable(String),

    /// The assignment document could not be parsed.
    #[error("malformed topic conf: {0}")]
    MetadataMalformed(String),

    /// Receiving from or sending on the stream failed.
    #[error("stream error: {0}")]
    StreamIo(#[from] Error),

    /// A response could not be delivered to the client.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The partition was torn down while a session tried to register.
    #[error("partition is shut down")]
    PartitionShutDown,

    /// The durable log rejected an operation.
    #[error("log error: {0}")]
    Log(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    /// Text placed in the `error` field of the response sent to the client.
    ///
    /// Activation failures are wrapped with the partition they concern.
    pub fn client_message(&self, topic: &Topic, partition: &Partition) -> String {
        match self {
            BrokerError::MissingInit | BrokerError::StreamIo(_) | BrokerError::Log(_) => {
                self.to_string()
            }
            _ => format!("topic {} partition {} not setup: {}", topic, partition, self),
        }
    }

    /// Label used by the activation metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            BrokerError::MissingInit => "missing_init",
            BrokerError::PartitionNotFound { .. } => "not_found",
            BrokerError::PartitionNotAssigned { .. } => "not_assigned",
            BrokerError::MetadataUnreachable(_) => "unreachable",
            BrokerError::MetadataMalformed(_) => "malformed",
            BrokerError::StreamIo(_) => "stream_io",
            BrokerError::SendFailed(_) => "send_failed",
            BrokerError::PartitionShutDown => "shut_down",
            BrokerError::Log(_) => "log",
            BrokerError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::MetadataMalformed(e.to_string())
    }
}

/// Not-found is mapped by the assignment reader, which knows the topic.
impl From<object_store::Error> for BrokerError {
    fn from(e: object_store::Error) -> Self {
        BrokerError::MetadataUnreachable(e.to_string())
    }
}
