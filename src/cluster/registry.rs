//! Process-wide map from (topic, partition) to the active local partition.
//!
//! `get`, `put` and `remove` are plain map operations and never wait on I/O.
//! [`LocalPartitionRegistry::get_or_activate`] serializes slow-path
//! activations per key so concurrent streams for an inactive partition end up
//! sharing one instance, while activations of other keys proceed in parallel.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::PartitionKey;
use super::error::BrokerResult;
use super::local_partition::LocalPartition;
use crate::types::{Partition, Topic};

#[derive(Debug, Default)]
pub struct LocalPartitionRegistry {
    partitions: DashMap<PartitionKey, Arc<LocalPartition>>,
    activation_locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
}

/// Holds a key's activation lock and drops the lock entry once unused.
struct ActivationSlot<'a> {
    key: PartitionKey,
    locks: &'a DashMap<PartitionKey, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ActivationSlot<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's reference is the only one left when nobody else waits.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl LocalPartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(topic: &Topic, partition: &Partition) -> PartitionKey {
        (topic.clone(), *partition)
    }

    pub fn get(&self, topic: &Topic, partition: &Partition) -> Option<Arc<LocalPartition>> {
        self.partitions
            .get(&Self::key(topic, partition))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or silently replace the instance for (topic, partition).
    pub fn put(&self, topic: &Topic, partition: &Partition, instance: Arc<LocalPartition>) {
        self.partitions.insert(Self::key(topic, partition), instance);
    }

    pub fn remove(&self, topic: &Topic, partition: &Partition) -> Option<Arc<LocalPartition>> {
        self.partitions
            .remove(&Self::key(topic, partition))
            .map(|(_, instance)| instance)
    }

    /// Remove the entry only if it still maps to `instance`.
    pub fn remove_instance(&self, instance: &Arc<LocalPartition>) -> bool {
        self.partitions
            .remove_if(
                &Self::key(instance.topic(), instance.partition()),
                |_, current| Arc::ptr_eq(current, instance),
            )
            .is_some()
    }

    /// Return the live instance, activating it if needed.
    ///
    /// At most one `activate` runs per key at a time. Callers that waited on
    /// an activation re-check the map and reuse its result. A resident
    /// instance that is already shut down counts as a miss and is replaced.
    pub async fn get_or_activate<F, Fut>(
        &self,
        topic: &Topic,
        partition: &Partition,
        activate: F,
    ) -> BrokerResult<Arc<LocalPartition>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BrokerResult<Arc<LocalPartition>>>,
    {
        if let Some(existing) = self.live(topic, partition) {
            return Ok(existing);
        }

        let key = Self::key(topic, partition);
        let lock = self
            .activation_locks
            .entry(key.clone())
            .or_default()
            .value()
            .clone();
        let mut slot = ActivationSlot {
            key,
            locks: &self.activation_locks,
            guard: None,
        };
        slot.guard = Some(lock.lock_owned().await);

        if let Some(existing) = self.live(topic, partition) {
            return Ok(existing);
        }
        if let Some(stale) = self.get(topic, partition) {
            self.remove_instance(&stale);
        }

        let instance = activate().await?;
        self.put(topic, partition, Arc::clone(&instance));
        Ok(instance)
    }

    fn live(&self, topic: &Topic, partition: &Partition) -> Option<Arc<LocalPartition>> {
        self.get(topic, partition).filter(|lp| !lp.is_shut_down())
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partitions(&self) -> Vec<Arc<LocalPartition>> {
        self.partitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Keys with an activation in flight or waiting.
    pub fn pending_activations(&self) -> usize {
        self.activation_locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::error::BrokerError;
    use crate::cluster::log::InMemoryLog;
    use crate::types::BrokerAddress;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn topic() -> Topic {
        Topic::new("test", "registry")
    }

    fn p(start: i32) -> Partition {
        Partition::new(8, start, start + 4, 1)
    }

    fn instance(partition: Partition) -> Arc<LocalPartition> {
        Arc::new(LocalPartition::new(
            topic(),
            partition,
            BrokerAddress::from("b1:1"),
            vec![],
            Arc::new(InMemoryLog::new()),
        ))
    }

    #[test]
    fn test_put_get_remove() {
        let registry = LocalPartitionRegistry::new();
        assert!(registry.get(&topic(), &p(0)).is_none());

        let lp = instance(p(0));
        registry.put(&topic(), &p(0), lp.clone());
        assert!(Arc::ptr_eq(&registry.get(&topic(), &p(0)).unwrap(), &lp));
        assert!(registry.get(&topic(), &p(4)).is_none());
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&topic(), &p(0)).unwrap();
        assert!(Arc::ptr_eq(&removed, &lp));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let registry = LocalPartitionRegistry::new();
        let first = instance(p(0));
        let second = instance(p(0));
        registry.put(&topic(), &p(0), first);
        registry.put(&topic(), &p(0), second.clone());
        assert!(Arc::ptr_eq(&registry.get(&topic(), &p(0)).unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_instance_is_conditional() {
        let registry = LocalPartitionRegistry::new();
        let old = instance(p(0));
        let new = instance(p(0));
        registry.put(&topic(), &p(0), new.clone());

        assert!(!registry.remove_instance(&old));
        assert!(registry.get(&topic(), &p(0)).is_some());
        assert!(registry.remove_instance(&new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_activate_single_winner() {
        let registry = Arc::new(LocalPartitionRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_activate(&topic(), &p(0), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(instance(p(0)))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|lp| Arc::ptr_eq(lp, &results[0])));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pending_activations(), 0);
    }

    #[tokio::test]
    async fn test_failed_activation_inserts_nothing() {
        let registry = LocalPartitionRegistry::new();
        let err = registry
            .get_or_activate(&topic(), &p(0), || async {
                Err(BrokerError::MetadataUnreachable("down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MetadataUnreachable(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.pending_activations(), 0);
    }

    #[tokio::test]
    async fn test_shut_down_instance_is_replaced() {
        let registry = LocalPartitionRegistry::new();
        let stale = instance(p(0));
        assert!(stale.maybe_shutdown());
        registry.put(&topic(), &p(0), stale.clone());

        let fresh = registry
            .get_or_activate(&topic(), &p(0), || async { Ok(instance(p(0))) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&fresh, &stale));
        assert!(Arc::ptr_eq(&registry.get(&topic(), &p(0)).unwrap(), &fresh));
    }

    #[tokio::test]
    async fn test_cancelled_activation_releases_lock() {
        let registry = Arc::new(LocalPartitionRegistry::new());
        let task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .get_or_activate(&topic(), &p(0), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(instance(p(0)))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.pending_activations(), 1);
        task.abort();
        let _ = task.await;
        assert_eq!(registry.pending_activations(), 0);

        let lp = registry
            .get_or_activate(&topic(), &p(0), || async { Ok(instance(p(0))) })
            .await
            .unwrap();
        assert_eq!(lp.partition(), &p(0));
    }
}
