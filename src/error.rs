//! Transport and wire-protocol level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Protocol Layer (`crate::error`)
//!
//! - [`Error`]: socket I/O, frame parsing and framing limits
//!
//! ## Broker Layer (`crate::cluster::error`)
//!
//! - [`BrokerError`]: handshake, partition activation, metadata and log errors
//! - Wraps [`Error`] as `BrokerError::StreamIo` when a stream operation fails
//!
//! [`BrokerError`]: crate::cluster::BrokerError

use bytes::Bytes;
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors raised while reading or writing publish stream frames.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// Could not parse the data.
    #[error("Parsing error: invalid data ({} bytes)", .0.len())]
    ParsingError(Bytes),

    /// Missing data or connection closed.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A frame announced a body larger than the configured limit.
    #[error("Frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A value cannot be represented on the wire.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::IoError(a), Error::IoError(b)) => a == b,
            (Error::ParsingError(a), Error::ParsingError(b)) => a == b,
            (Error::MissingData(a), Error::MissingData(b)) => a == b,
            (
                Error::FrameTooLarge { size: s1, max: m1 },
                Error::FrameTooLarge { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (Error::Encoding(a), Error::Encoding(b)) => a == b,
            (Error::Config(a), Error::Config(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.kind())
    }
}

impl Error {
    /// True when the peer went away rather than sending bad data.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::IoError(
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }
}
