//! Durable log collaborator of a local partition.
//!
//! The broker never looks inside a log: it appends published messages and
//! hands reads through to subscribers. [`InMemoryLog`] backs tests and the
//! demo broker.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::PartitionKey;
use super::error::{BrokerError, BrokerResult};
use crate::protocol::DataMessage;
use crate::types::{Partition, Topic};

/// Append and read access to one partition's messages.
#[async_trait]
pub trait PartitionLog: Send + Sync {
    async fn append(&self, message: &DataMessage) -> BrokerResult<()>;

    /// Up to `max` messages with `ts_ns >= since_ns`, in append order.
    async fn read(&self, since_ns: i64, max: usize) -> BrokerResult<Vec<DataMessage>>;
}

/// Opens the log handle for a partition being activated.
#[async_trait]
pub trait LogFactory: Send + Sync {
    async fn open(&self, topic: &Topic, partition: &Partition) -> BrokerResult<Arc<dyn PartitionLog>>;
}

#[derive(Debug, Default)]
pub struct InMemoryLog {
    messages: RwLock<Vec<DataMessage>>,
    fail_appends: AtomicBool,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail until reset.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    pub async fn messages(&self) -> Vec<DataMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl PartitionLog for InMemoryLog {
    async fn append(&self, message: &DataMessage) -> BrokerResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(BrokerError::Log("append rejected".to_string()));
        }
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn read(&self, since_ns: i64, max: usize) -> BrokerResult<Vec<DataMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.ts_ns >= since_ns)
            .take(max)
            .cloned()
            .collect())
    }
}

/// Hands out one [`InMemoryLog`] per partition.
///
/// Logs outlive the partitions that opened them, so a reactivated partition
/// sees what earlier sessions appended.
#[derive(Debug, Default)]
pub struct InMemoryLogFactory {
    logs: DashMap<PartitionKey, Arc<InMemoryLog>>,
    opens: AtomicUsize,
}

impl InMemoryLogFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The log of a partition, if it was ever opened.
    pub fn log(&self, topic: &Topic, partition: &Partition) -> Option<Arc<InMemoryLog>> {
        self.logs
            .get(&(topic.clone(), *partition))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of times [`LogFactory::open`] was called.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogFactory for InMemoryLogFactory {
    async fn open(&self, topic: &Topic, partition: &Partition) -> BrokerResult<Arc<dyn PartitionLog>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let log: Arc<dyn PartitionLog> = self
            .logs
            .entry((topic.clone(), *partition))
            .or_default()
            .value()
            .clone();
        Ok(log)
    }
}
