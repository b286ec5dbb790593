//! Partition assignment documents and the reader that fetches them.
//!
//! Each topic has one document at `<topics-root>/<namespace>/<name>/topic.conf`
//! in the metadata store:
//!
//! ```json
//! {
//!   "brokerPartitionAssignments": [
//!     {
//!       "partition": {"ringSize": 1024, "rangeStart": 0, "rangeStop": 512, "unixTimeNs": "1700000000000000000"},
//!       "leaderBroker": "10.0.0.1:17777",
//!       "followerBrokers": ["10.0.0.2:17777"]
//!     }
//!   ]
//! }
//! ```
//!
//! The broker only reads these documents. Unknown fields are ignored and
//! missing fields take their defaults.

use async_trait::async_trait;
use object_store::path::{Path, PathPart};
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::error::{BrokerError, BrokerResult};
use crate::constants::TOPIC_CONF_FILE;
use crate::types::{BrokerAddress, Partition, Topic};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerPartitionAssignment {
    pub partition: Partition,
    pub leader_broker: BrokerAddress,
    pub follower_brokers: Vec<BrokerAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentDocument {
    pub broker_partition_assignments: Vec<BrokerPartitionAssignment>,
}

impl AssignmentDocument {
    pub fn from_slice(data: &[u8]) -> BrokerResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The entry for `partition` led by `broker`, if any.
    pub fn leader_assignment(
        &self,
        partition: &Partition,
        broker: &BrokerAddress,
    ) -> Option<&BrokerPartitionAssignment> {
        self.broker_partition_assignments
            .iter()
            .find(|a| a.partition == *partition && a.leader_broker == *broker)
    }
}

/// Location of a topic's assignment document.
pub fn topic_conf_path(topics_root: &str, topic: &Topic) -> Path {
    let parts = topics_root
        .split('/')
        .filter(|p| !p.is_empty())
        .chain([topic.namespace(), topic.name(), TOPIC_CONF_FILE])
        .map(PathPart::from);
    Path::from_iter(parts)
}

/// Source of assignment documents.
#[async_trait]
pub trait AssignmentSource: Send + Sync {
    /// Fetch and parse the document for `topic`. Never retries.
    async fn read(&self, topic: &Topic) -> BrokerResult<AssignmentDocument>;
}

/// Reads assignment documents from an object store.
#[derive(Debug, Clone)]
pub struct AssignmentReader {
    store: Arc<dyn ObjectStore>,
    topics_root: String,
}

impl AssignmentReader {
    pub fn new(store: Arc<dyn ObjectStore>, topics_root: impl Into<String>) -> Self {
        Self {
            store,
            topics_root: topics_root.into(),
        }
    }

    /// Store a document for `topic`.
    ///
    /// The broker never calls this; it exists for provisioning tools and tests.
    pub async fn write(&self, topic: &Topic, document: &AssignmentDocument) -> BrokerResult<()> {
        let path = topic_conf_path(&self.topics_root, topic);
        let data = serde_json::to_vec_pretty(document)?;
        self.store.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentSource for AssignmentReader {
    async fn read(&self, topic: &Topic) -> BrokerResult<AssignmentDocument> {
        let path = topic_conf_path(&self.topics_root, topic);
        debug!(topic = %topic, path = %path, "Reading topic conf");

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(BrokerError::PartitionNotFound {
                    topic: topic.clone(),
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let data = result.bytes().await?;
        AssignmentDocument::from_slice(&data)
    }
}
