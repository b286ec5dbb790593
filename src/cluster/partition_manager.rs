//! Resolution, activation and teardown of local partitions.
//!
//! # Activation
//!
//! A stream for a partition that is not resident triggers the slow path:
//!
//! 1. Read the topic's assignment document (no caching, no retries)
//! 2. Find the entry for the partition whose leader is this broker
//! 3. Open the partition log and insert the new [`LocalPartition`]
//!
//! A broker never activates a partition it does not lead.
//!
//! # Attach / detach
//!
//! Registration races with teardown: a partition can shut down between the
//! registry lookup and `add_publisher`. Registration on a shut-down partition
//! fails, so [`PartitionManager::attach_publisher`] evicts that instance and
//! resolves again, a bounded number of times.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::assignment::AssignmentSource;
use super::error::{BrokerError, BrokerResult};
use super::local_partition::{LocalPartition, PublisherSession};
use super::log::LogFactory;
use super::metrics;
use super::registry::LocalPartitionRegistry;
use crate::constants::MAX_ATTACH_ATTEMPTS;
use crate::types::{BrokerAddress, Partition, Topic};

pub struct PartitionManager {
    self_address: BrokerAddress,
    registry: Arc<LocalPartitionRegistry>,
    assignments: Arc<dyn AssignmentSource>,
    logs: Arc<dyn LogFactory>,
}

impl PartitionManager {
    pub fn new(
        self_address: BrokerAddress,
        registry: Arc<LocalPartitionRegistry>,
        assignments: Arc<dyn AssignmentSource>,
        logs: Arc<dyn LogFactory>,
    ) -> Self {
        Self {
            self_address,
            registry,
            assignments,
            logs,
        }
    }

    pub fn self_address(&self) -> &BrokerAddress {
        &self.self_address
    }

    pub fn registry(&self) -> &Arc<LocalPartitionRegistry> {
        &self.registry
    }

    /// The live local partition, activating it on a registry miss.
    pub async fn resolve(
        &self,
        topic: &Topic,
        partition: &Partition,
    ) -> BrokerResult<Arc<LocalPartition>> {
        self.registry
            .get_or_activate(topic, partition, || self.activate(topic, partition))
            .await
    }

    async fn activate(
        &self,
        topic: &Topic,
        partition: &Partition,
    ) -> BrokerResult<Arc<LocalPartition>> {
        let started = Instant::now();
        info!(
            broker = %self.self_address,
            topic = %topic,
            partition = %partition,
            "Loading topic partition"
        );

        let result = self.load(topic, partition).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(_) => {
                metrics::record_activation("ok", elapsed);
                metrics::LOCAL_PARTITIONS.inc();
            }
            Err(e) => {
                metrics::record_activation(e.as_metric_label(), elapsed);
                warn!(topic = %topic, partition = %partition, error = %e, "Partition activation failed");
            }
        }
        result
    }

    async fn load(&self, topic: &Topic, partition: &Partition) -> BrokerResult<Arc<LocalPartition>> {
        let document = self.assignments.read(topic).await?;

        let assignment = document
            .leader_assignment(partition, &self.self_address)
            .ok_or_else(|| BrokerError::PartitionNotAssigned {
                topic: topic.clone(),
                partition: *partition,
                broker: self.self_address.clone(),
            })?;

        let log = self.logs.open(topic, partition).await?;
        Ok(Arc::new(LocalPartition::from_assignment(
            topic.clone(),
            assignment,
            log,
        )))
    }

    /// Resolve the partition and register `session` on it.
    pub async fn attach_publisher(
        &self,
        topic: &Topic,
        partition: &Partition,
        session: &Arc<PublisherSession>,
    ) -> BrokerResult<Arc<LocalPartition>> {
        for attempt in 1..=MAX_ATTACH_ATTEMPTS {
            let local = self.resolve(topic, partition).await?;
            match local.add_publisher(Arc::clone(session)) {
                Ok(displaced) => {
                    match displaced {
                        // The gauge already counts the id; the displaced
                        // session will not decrement it.
                        Some(previous) => {
                            previous.set_stopping();
                            warn!(
                                topic = %topic,
                                partition = %partition,
                                session = %previous.id(),
                                "Session id collision, previous session replaced"
                            );
                        }
                        None => metrics::ACTIVE_PUBLISHERS.inc(),
                    }
                    debug!(
                        topic = %topic,
                        partition = %partition,
                        session = %session.id(),
                        publishers = local.publisher_count(),
                        "Publisher attached"
                    );
                    return Ok(local);
                }
                Err(BrokerError::PartitionShutDown) => {
                    debug!(
                        topic = %topic,
                        partition = %partition,
                        attempt,
                        "Partition shut down during attach, resolving again"
                    );
                    self.registry.remove_instance(&local);
                }
                Err(e) => return Err(e),
            }
        }
        Err(BrokerError::PartitionShutDown)
    }

    /// Deregister `session`, tearing the partition down if it was the last
    /// dependent. Returns true if the partition was torn down.
    pub fn detach_publisher(
        &self,
        local: &Arc<LocalPartition>,
        session: &Arc<PublisherSession>,
    ) -> bool {
        if local.remove_publisher(session) {
            metrics::ACTIVE_PUBLISHERS.dec();
            debug!(
                topic = %local.topic(),
                partition = %local.partition(),
                session = %session.id(),
                publishers = local.publisher_count(),
                subscribers = local.subscriber_count(),
                "Publisher detached"
            );
        }
        self.release(local)
    }

    /// Tear `local` down if nothing depends on it.
    pub fn release(&self, local: &Arc<LocalPartition>) -> bool {
        if !local.maybe_shutdown() {
            return false;
        }
        self.registry.remove_instance(local);
        metrics::LOCAL_PARTITIONS.dec();
        metrics::PARTITION_SHUTDOWNS.inc();
        true
    }

    /// Fire the stop signal of a resident partition. False if not resident.
    pub fn stop_publishers(&self, topic: &Topic, partition: &Partition) -> bool {
        match self.registry.get(topic, partition) {
            Some(local) => {
                local.stop_publishers();
                true
            }
            None => false,
        }
    }

    pub fn local_partitions(&self) -> Vec<Arc<LocalPartition>> {
        self.registry.partitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::assignment::{AssignmentDocument, BrokerPartitionAssignment};
    use crate::cluster::log::InMemoryLogFactory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAssignments {
        document: Option<AssignmentDocument>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl AssignmentSource for StaticAssignments {
        async fn read(&self, topic: &Topic) -> BrokerResult<AssignmentDocument> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.document
                .clone()
                .ok_or_else(|| BrokerError::PartitionNotFound {
                    topic: topic.clone(),
                    path: "topics/x".to_string(),
                })
        }
    }

    fn topic() -> Topic {
        Topic::new("test", "manager")
    }

    fn p0() -> Partition {
        Partition::new(8, 0, 4, 1)
    }

    fn p1() -> Partition {
        Partition::new(8, 4, 8, 1)
    }

    fn manager(document: Option<AssignmentDocument>) -> (PartitionManager, Arc<StaticAssignments>) {
        let assignments = Arc::new(StaticAssignments {
            document,
            reads: AtomicUsize::new(0),
        });
        let manager = PartitionManager::new(
            BrokerAddress::from("b1:1"),
            Arc::new(LocalPartitionRegistry::new()),
            assignments.clone(),
            Arc::new(InMemoryLogFactory::new()),
        );
        (manager, assignments)
    }

    fn document() -> AssignmentDocument {
        AssignmentDocument {
            broker_partition_assignments: vec![
                BrokerPartitionAssignment {
                    partition: p0(),
                    leader_broker: "b2:1".into(),
                    follower_brokers: vec!["b1:1".into()],
                },
                BrokerPartitionAssignment {
                    partition: p1(),
                    leader_broker: "b1:1".into(),
                    follower_brokers: vec!["b3:1".into()],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_resolve_activates_led_partition() {
        let (manager, assignments) = manager(Some(document()));
        let local = manager.resolve(&topic(), &p1()).await.unwrap();
        assert_eq!(local.leader().as_str(), "b1:1");
        assert_eq!(local.followers(), &[BrokerAddress::from("b3:1")]);

        let again = manager.resolve(&topic(), &p1()).await.unwrap();
        assert!(Arc::ptr_eq(&local, &again));
        assert_eq!(assignments.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follower_partition_not_activated() {
        let (manager, assignments) = manager(Some(document()));
        for _ in 0..2 {
            let err = manager.resolve(&topic(), &p0()).await.unwrap_err();
            assert!(matches!(err, BrokerError::PartitionNotAssigned { .. }));
        }
        assert!(manager.registry().is_empty());
        // Misses are not cached.
        assert_eq!(assignments.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_document() {
        let (manager, _) = manager(None);
        let err = manager.resolve(&topic(), &p1()).await.unwrap_err();
        assert!(matches!(err, BrokerError::PartitionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_detach_last_publisher_tears_down() {
        let (manager, _) = manager(Some(document()));
        let s1 = Arc::new(PublisherSession::new("s1"));
        let s2 = Arc::new(PublisherSession::new("s2"));

        let local = manager.attach_publisher(&topic(), &p1(), &s1).await.unwrap();
        let same = manager.attach_publisher(&topic(), &p1(), &s2).await.unwrap();
        assert!(Arc::ptr_eq(&local, &same));
        assert_eq!(local.publisher_count(), 2);

        assert!(!manager.detach_publisher(&local, &s1));
        assert_eq!(manager.local_partitions().len(), 1);
        assert!(manager.detach_publisher(&local, &s2));
        assert!(manager.local_partitions().is_empty());
        assert!(local.is_shut_down());
    }

    #[tokio::test]
    async fn test_attach_after_teardown_reactivates() {
        let (manager, assignments) = manager(Some(document()));
        let s1 = Arc::new(PublisherSession::new("s1"));
        let first = manager.attach_publisher(&topic(), &p1(), &s1).await.unwrap();
        assert!(manager.detach_publisher(&first, &s1));

        let s2 = Arc::new(PublisherSession::new("s2"));
        let second = manager.attach_publisher(&topic(), &p1(), &s2).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(assignments.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attach_evicts_shut_down_resident() {
        let (manager, _) = manager(Some(document()));
        let stale = manager.resolve(&topic(), &p1()).await.unwrap();
        // Shut down without going through the manager, leaving it registered.
        assert!(stale.maybe_shutdown());

        let session = Arc::new(PublisherSession::new("s"));
        let fresh = manager.attach_publisher(&topic(), &p1(), &session).await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(fresh.publisher_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_publishers() {
        let (manager, _) = manager(Some(document()));
        assert!(!manager.stop_publishers(&topic(), &p1()));
        let local = manager.resolve(&topic(), &p1()).await.unwrap();
        assert!(manager.stop_publishers(&topic(), &p1()));
        assert!(local.is_stopping());
    }

    #[tokio::test]
    async fn test_colliding_session_is_displaced_once() {
        let (manager, _) = manager(Some(document()));
        let first = Arc::new(PublisherSession::new("same"));
        let second = Arc::new(PublisherSession::new("same"));

        let local = manager.attach_publisher(&topic(), &p1(), &first).await.unwrap();
        manager.attach_publisher(&topic(), &p1(), &second).await.unwrap();
        assert!(first.is_stopping());
        assert!(!second.is_stopping());
        assert_eq!(local.publisher_count(), 1);

        // The displaced session is no longer a dependent.
        assert!(!local.remove_publisher(&first));
        assert!(manager.detach_publisher(&local, &second));
        assert!(!manager.detach_publisher(&local, &first));
        assert!(manager.registry().is_empty());
    }
}
