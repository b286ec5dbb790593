//! Partition state of the broker.
//!
//! ```text
//!   publish stream ──► PartitionManager ──► LocalPartitionRegistry
//!                            │                     │
//!                            │ miss                │ (topic, partition)
//!                            ▼                     ▼
//!                    AssignmentReader         LocalPartition ──► PartitionLog
//!                            │
//!                            ▼
//!                       ObjectStore  (topics/<ns>/<name>/topic.conf)
//! ```
//!
//! - [`PartitionManager`]: lazy activation and the attach/detach discipline
//! - [`LocalPartitionRegistry`]: at most one live [`LocalPartition`] per key
//! - [`AssignmentReader`]: reads partition assignment documents
//! - [`PartitionLog`] / [`LogFactory`]: the durable log collaborator

pub mod assignment;
mod config;
mod error;
pub mod local_partition;
pub mod log;
pub mod metadata_store;
pub mod metrics;
mod partition_manager;
pub mod registry;

pub use assignment::{
    AssignmentDocument, AssignmentReader, AssignmentSource, BrokerPartitionAssignment,
    topic_conf_path,
};
pub use config::{BrokerConfig, MetadataStoreType, PublishConfig};
pub use error::{BrokerError, BrokerResult};
pub use local_partition::{LocalPartition, PublisherSession, session_id};
pub use log::{InMemoryLog, InMemoryLogFactory, LogFactory, PartitionLog};
pub use metadata_store::create_object_store;
pub use partition_manager::PartitionManager;
pub use registry::LocalPartitionRegistry;

use crate::types::{Partition, Topic};

/// Registry key. `Topic` holds `Arc<str>` parts, so keys clone cheaply.
pub type PartitionKey = (Topic, Partition);
