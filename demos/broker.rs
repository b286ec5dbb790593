//! Single broker serving publish streams.
//!
//! ## Running
//!
//! ```bash
//! cargo run --example broker
//! ```
//!
//! With JSON logging:
//! ```bash
//! LOG_FORMAT=json RUST_LOG=tidemq=debug cargo run --example broker
//! ```
//!
//! With assignment documents on the local filesystem:
//! ```bash
//! METADATA_STORE_TYPE=local METADATA_PATH=/tmp/tidemq-metadata cargo run --example broker
//! ```
//!
//! With the in-memory store (the default) the broker provisions one topic,
//! `demo/events`, with a single partition it leads, so
//! `cargo run --example publisher` works out of the box.

use std::sync::Arc;
use std::time::Duration;

use tidemq::cluster::{
    AssignmentDocument, AssignmentReader, BrokerConfig, BrokerPartitionAssignment,
    InMemoryLogFactory, LocalPartitionRegistry, MetadataStoreType, PartitionManager,
    PublishConfig, create_object_store, metrics,
};
use tidemq::server::health::HealthServer;
use tidemq::server::{BrokerServer, PublishHandler};
use tidemq::telemetry::{LogFormat, init_logging};
use tidemq::types::{Partition, Topic};
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env()).map_err(|e| -> Box<dyn std::error::Error> { e })?;
    metrics::init_metrics();

    let config = BrokerConfig::from_env()?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(format!("{} configuration errors", errors.len()).into());
    }

    info!(
        broker = %config.self_address(),
        listen_addr = %config.listen_addr,
        health_port = config.health_port,
        metadata_store = config.metadata_store.as_str(),
        topics_root = %config.topics_root,
        "Starting broker"
    );

    let store = create_object_store(&config)?;
    let assignments = AssignmentReader::new(store, config.topics_root.clone());
    if config.metadata_store == MetadataStoreType::Memory {
        provision_demo_topic(&assignments, &config).await?;
    }

    let manager = PartitionManager::new(
        config.self_address(),
        Arc::new(LocalPartitionRegistry::new()),
        Arc::new(assignments),
        Arc::new(InMemoryLogFactory::new()),
    );
    let handler = PublishHandler::new(Arc::new(manager), PublishConfig::from(&config));
    let server = BrokerServer::with_config(
        &config.listen_addr,
        Arc::new(handler),
        config.max_connections,
        config.max_frame_size,
    )
    .await?;

    let health_handle = if config.health_port > 0 {
        let health_addr = format!("0.0.0.0:{}", config.health_port);
        match HealthServer::with_broker(
            &health_addr,
            server.shutting_down_flag(),
            Some(config.self_address().to_string()),
        )
        .await
        {
            Ok(health) => Some(tokio::spawn(async move {
                let _ = health.run().await;
            })),
            Err(e) => {
                warn!(error = %e, "Failed to start health server - continuing without it");
                None
            }
        }
    } else {
        info!("Health server disabled (HEALTH_PORT=0)");
        None
    };

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, draining publishers");
            if !server.shutdown_and_wait(DRAIN_TIMEOUT).await {
                warn!(remaining = server.active_connections(), "Exiting with open streams");
            }
        }
    }

    if let Some(handle) = health_handle {
        handle.abort();
    }
    Ok(())
}

async fn provision_demo_topic(
    assignments: &AssignmentReader,
    config: &BrokerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let topic = Topic::new("demo", "events");
    let document = AssignmentDocument {
        broker_partition_assignments: vec![BrokerPartitionAssignment {
            partition: Partition::new(1024, 0, 1024, 0),
            leader_broker: config.self_address(),
            follower_brokers: vec![],
        }],
    };
    assignments.write(&topic, &document).await?;
    info!(topic = %topic, "Provisioned demo topic");
    Ok(())
}
