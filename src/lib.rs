//! # tidemq
//! Publish ingestion path of a partitioned pub/sub message broker.
//!
//! A broker accepts streaming publish connections for a topic partition,
//! activates the partition on demand from externally stored assignment
//! metadata, acknowledges inbound messages in batches, and tears the
//! partition down when its last publisher leaves.
//!
//! # Layout
//! - [`protocol`]: publish stream messages and their frame encoding
//! - [`cluster`]: partition registry, activation, assignment documents, logs
//! - [`server`]: the publish stream handler and the TCP server around it
//! - [`client`]: a small publish client
//! - [`telemetry`]: logging and optional OpenTelemetry export
//!
//! ## Running a broker
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemq::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::from_env()?;
//!     let store = create_object_store(&config)?;
//!     let manager = PartitionManager::new(
//!         config.self_address(),
//!         Arc::new(LocalPartitionRegistry::new()),
//!         Arc::new(AssignmentReader::new(store, config.topics_root.clone())),
//!         Arc::new(InMemoryLogFactory::new()),
//!     );
//!     let handler = PublishHandler::new(Arc::new(manager), PublishConfig::from(&config));
//!     let server = BrokerServer::new(&config.listen_addr, handler).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! See `demos/broker.rs` for a broker with health checks and graceful
//! shutdown, and `demos/publisher.rs` for a client.

#![forbid(unsafe_code)]

mod encode;
pub mod error;
mod parser;
pub mod protocol;
pub mod server;
pub mod types;

pub mod client;
pub mod cluster;
pub mod constants;
pub mod telemetry;

pub use encode::ToByte;

pub mod prelude {
    //! Main exports for embedding a broker or writing a publisher.
    pub use crate::client::PublishClient;
    pub use crate::cluster::{
        AssignmentDocument, AssignmentReader, BrokerConfig, BrokerError, BrokerPartitionAssignment,
        BrokerResult, InMemoryLogFactory, LocalPartitionRegistry, PartitionManager, PublishConfig,
        create_object_store,
    };
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{DataMessage, InitMessage, PublishRequest, PublishResponse};
    pub use crate::server::{BrokerServer, PublishHandler};
    pub use crate::types::{BrokerAddress, Partition, Topic};

    pub use bytes;
}
