//! Runtime state of a partition served by this broker.
//!
//! A [`LocalPartition`] is created on first need and shared by every session
//! attached to it. It dies when the last publisher or subscriber detaches:
//! [`LocalPartition::maybe_shutdown`] flips it into a terminal state under the
//! same lock that guards registration, so a session can never attach to a
//! partition that is being torn down.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

use super::assignment::BrokerPartitionAssignment;
use super::error::{BrokerError, BrokerResult};
use super::log::PartitionLog;
use crate::constants::SESSION_DISAMBIGUATOR_RANGE;
use crate::protocol::DataMessage;
use crate::types::{BrokerAddress, Partition, Topic};

/// Build a session id: `{client}-{rand:04}/{topic}/{partition}`.
///
/// Uniqueness is best effort. Two sessions that draw the same id replace
/// each other in the publisher set, and each only ever removes itself.
pub fn session_id(client_addr: &str, topic: &Topic, partition: &Partition) -> String {
    format!(
        "{}-{:04}/{}/{}",
        client_addr,
        fastrand::u32(0..SESSION_DISAMBIGUATOR_RANGE),
        topic,
        partition
    )
}

/// One publish stream attached to a partition.
#[derive(Debug)]
pub struct PublisherSession {
    id: String,
    ack_sequence: AtomicI64,
    stopping: AtomicBool,
    connected_at: Instant,
}

impl PublisherSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ack_sequence: AtomicI64::new(0),
            stopping: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of messages appended by this session so far.
    #[inline]
    pub fn ack_sequence(&self) -> i64 {
        self.ack_sequence.load(Ordering::Acquire)
    }

    /// Count one appended message and return the new sequence.
    #[inline]
    pub fn advance(&self) -> i64 {
        self.ack_sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

#[derive(Default)]
struct Dependents {
    publishers: HashMap<String, Arc<PublisherSession>>,
    subscribers: HashSet<String>,
    shut_down: bool,
    log: Option<Arc<dyn PartitionLog>>,
}

pub struct LocalPartition {
    topic: Topic,
    partition: Partition,
    leader: BrokerAddress,
    followers: Vec<BrokerAddress>,
    dependents: Mutex<Dependents>,
    stop: CancellationToken,
    created_at: Instant,
}

impl LocalPartition {
    pub fn new(
        topic: Topic,
        partition: Partition,
        leader: BrokerAddress,
        followers: Vec<BrokerAddress>,
        log: Arc<dyn PartitionLog>,
    ) -> Self {
        Self {
            topic,
            partition,
            leader,
            followers,
            dependents: Mutex::new(Dependents {
                log: Some(log),
                ..Dependents::default()
            }),
            stop: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    /// Build from the assignment entry this broker leads.
    pub fn from_assignment(
        topic: Topic,
        assignment: &BrokerPartitionAssignment,
        log: Arc<dyn PartitionLog>,
    ) -> Self {
        Self::new(
            topic,
            assignment.partition,
            assignment.leader_broker.clone(),
            assignment.follower_brokers.clone(),
            log,
        )
    }

    // Critical sections never await and never panic, so a poisoned lock
    // still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, Dependents> {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    #[inline]
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn leader(&self) -> &BrokerAddress {
        &self.leader
    }

    pub fn followers(&self) -> &[BrokerAddress] {
        &self.followers
    }

    // =========================================================================
    // Dependents
    // =========================================================================

    /// Register a publisher.
    ///
    /// An existing session with the same id is replaced and returned; it no
    /// longer counts as a dependent.
    pub fn add_publisher(
        &self,
        session: Arc<PublisherSession>,
    ) -> BrokerResult<Option<Arc<PublisherSession>>> {
        let mut deps = self.lock();
        if deps.shut_down {
            return Err(BrokerError::PartitionShutDown);
        }
        Ok(deps.publishers.insert(session.id().to_string(), session))
    }

    /// Deregister `session` if it is still the registered one for its id.
    pub fn remove_publisher(&self, session: &Arc<PublisherSession>) -> bool {
        let mut deps = self.lock();
        match deps.publishers.get(session.id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                deps.publishers.remove(session.id());
                true
            }
            _ => false,
        }
    }

    pub fn add_subscriber(&self, id: impl Into<String>) -> BrokerResult<()> {
        let mut deps = self.lock();
        if deps.shut_down {
            return Err(BrokerError::PartitionShutDown);
        }
        deps.subscribers.insert(id.into());
        Ok(())
    }

    pub fn remove_subscriber(&self, id: &str) -> bool {
        self.lock().subscribers.remove(id)
    }

    /// Tear the partition down if nothing depends on it any more.
    ///
    /// Returns true exactly once, for the call that performed the teardown.
    /// The log handle is released; logged data is left untouched.
    pub fn maybe_shutdown(&self) -> bool {
        let log = {
            let mut deps = self.lock();
            if deps.shut_down || !deps.publishers.is_empty() || !deps.subscribers.is_empty() {
                return false;
            }
            deps.shut_down = true;
            deps.log.take()
        };
        drop(log);

        info!(
            topic = %self.topic,
            partition = %self.partition,
            lived_ms = self.created_at.elapsed().as_millis() as u64,
            "Local partition shut down"
        );
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn publisher_count(&self) -> usize {
        self.lock().publishers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn publishers(&self) -> Vec<Arc<PublisherSession>> {
        self.lock().publishers.values().cloned().collect()
    }

    // =========================================================================
    // Log access
    // =========================================================================

    fn log(&self) -> BrokerResult<Arc<dyn PartitionLog>> {
        self.lock()
            .log
            .clone()
            .ok_or(BrokerError::PartitionShutDown)
    }

    /// Append one message to the partition log.
    pub async fn publish(&self, message: &DataMessage) -> BrokerResult<()> {
        let log = self.log()?;
        log.append(message).await
    }

    /// Read for the subscribe path.
    pub async fn read(&self, since_ns: i64, max: usize) -> BrokerResult<Vec<DataMessage>> {
        let log = self.log()?;
        log.read(since_ns, max).await
    }

    // =========================================================================
    // Stop signal
    // =========================================================================

    /// Ask every current and future publisher session to close.
    pub fn stop_publishers(&self) {
        info!(topic = %self.topic, partition = %self.partition, "Stopping publishers");
        self.stop.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once [`stop_publishers`](Self::stop_publishers) was called.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    /// Owned handle on the stop signal for tasks that outlive a borrow.
    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl fmt::Debug for LocalPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps = self.lock();
        f.debug_struct("LocalPartition")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("leader", &self.leader)
            .field("publishers", &deps.publishers.len())
            .field("subscribers", &deps.subscribers.len())
            .field("shut_down", &deps.shut_down)
            .finish()
    }
}
