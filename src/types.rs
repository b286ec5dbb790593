//! Identity values shared by the broker: topics, partitions and broker addresses.
//!
//! All three are immutable once constructed. `Topic` stores its parts as
//! `Arc<str>` so registry keys clone in O(1) on the hot path.

use bytes::BufMut;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::encode::ToByte;
use crate::error::Result;

/// A named logical stream, `namespace.name`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    namespace: Arc<str>,
    name: Arc<str>,
}

impl Topic {
    #[inline]
    pub fn new(namespace: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({}.{})", self.namespace, self.name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl ToByte for Topic {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.namespace().encode(buffer)?;
        self.name().encode(buffer)
    }
}

/// One shard of a topic.
///
/// The range/ring semantics belong to the assignment system; the broker only
/// compares partitions for equality. `unix_time_ns` identifies the generation
/// the partition was created in, so the same range from a newer generation is
/// a different partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Partition {
    pub ring_size: i32,
    pub range_start: i32,
    pub range_stop: i32,
    #[serde(deserialize_with = "deserialize_lenient_i64")]
    pub unix_time_ns: i64,
}

impl Partition {
    pub const fn new(ring_size: i32, range_start: i32, range_stop: i32, unix_time_ns: i64) -> Self {
        Self {
            ring_size,
            range_start,
            range_stop,
            unix_time_ns,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:04}/{}@{}",
            self.range_start, self.range_stop, self.ring_size, self.unix_time_ns
        )
    }
}

impl ToByte for Partition {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.ring_size.encode(buffer)?;
        self.range_start.encode(buffer)?;
        self.range_stop.encode(buffer)?;
        self.unix_time_ns.encode(buffer)
    }
}

/// Protobuf JSON writes 64-bit integers as strings; accept both forms.
fn deserialize_lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(i64),
        Text(String),
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// `host:port` identity of a broker process.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct BrokerAddress(Arc<str>);

impl BrokerAddress {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self(address.into())
    }

    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port).into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerAddress({})", self.0)
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrokerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
