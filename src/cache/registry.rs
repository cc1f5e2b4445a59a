//! Partition registry: the authoritative set of known partitions.
//!
//! The registry owns every registered [`Partition`] (through `Arc`) and its
//! [`SubscribeInfo`], and maintains two secondary indices:
//!
//! ```text
//!   partitions:         key   -> Arc<Partition>
//!   subscribe_infos:    key   -> SubscribeInfo
//!   topic_partitions:   topic -> {key, ...}
//!   broker_partitions:  node  -> {key, ...}     (NodeRef, identity-keyed)
//! ```
//!
//! Every key in `partitions` appears in exactly its own topic and broker
//! bucket, and every key in a bucket exists in `partitions`. Buckets are
//! dropped when they become empty. The registry is not synchronized itself;
//! it lives inside the cache's metadata lock together with the allocation pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::types::{NodeRef, Partition, PartitionKey, SubscribeInfo};

#[derive(Debug, Default)]
pub struct PartitionRegistry {
    partitions: HashMap<PartitionKey, Arc<Partition>>,
    subscribe_infos: HashMap<PartitionKey, SubscribeInfo>,
    topic_partitions: HashMap<Arc<str>, HashSet<PartitionKey>>,
    broker_partitions: HashMap<NodeRef, HashSet<PartitionKey>>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a partition with its subscription unless the key is already
    /// known. Returns `true` if it was inserted.
    pub fn insert(&mut self, subscribe_info: SubscribeInfo) -> bool {
        let partition = subscribe_info.partition().clone();
        let key = partition.key().clone();
        if self.partitions.contains_key(&key) {
            return false;
        }

        self.topic_partitions
            .entry(Arc::from(partition.topic()))
            .or_default()
            .insert(key.clone());
        self.broker_partitions
            .entry(partition.broker().clone())
            .or_default()
            .insert(key.clone());
        self.subscribe_infos.insert(key.clone(), subscribe_info);
        self.partitions.insert(key, partition);
        true
    }

    /// Remove a partition from the primary map and both indices.
    pub fn remove(&mut self, key: &str) -> Option<Arc<Partition>> {
        let partition = self.partitions.remove(key)?;
        self.subscribe_infos.remove(key);

        if let Some(keys) = self.topic_partitions.get_mut(partition.topic()) {
            keys.remove(key);
            if keys.is_empty() {
                self.topic_partitions.remove(partition.topic());
            }
        }
        if let Some(keys) = self.broker_partitions.get_mut(partition.broker()) {
            keys.remove(key);
            if keys.is_empty() {
                self.broker_partitions.remove(partition.broker());
            }
        }
        Some(partition)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Partition>> {
        self.partitions.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.partitions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn subscribe_info(&self, key: &str) -> Option<&SubscribeInfo> {
        self.subscribe_infos.get(key)
    }

    pub fn subscribe_infos(&self) -> Vec<SubscribeInfo> {
        self.subscribe_infos.values().cloned().collect()
    }

    /// Partitions registered under exactly this node reference.
    pub fn partitions_for_broker(&self, broker: &NodeRef) -> Vec<Arc<Partition>> {
        self.collect_bucket(self.broker_partitions.get(broker))
    }

    pub fn partitions_for_topic(&self, topic: &str) -> Vec<Arc<Partition>> {
        self.collect_bucket(self.topic_partitions.get(topic))
    }

    pub fn topics(&self) -> Vec<String> {
        self.topic_partitions.keys().map(|t| t.to_string()).collect()
    }

    pub fn brokers(&self) -> Vec<NodeRef> {
        self.broker_partitions.keys().cloned().collect()
    }

    fn collect_bucket(&self, bucket: Option<&HashSet<PartitionKey>>) -> Vec<Arc<Partition>> {
        bucket
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| self.partitions.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Verify the index invariants, describing the first violation found.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.subscribe_infos.len() != self.partitions.len() {
            return Err(format!(
                "{} subscribe infos for {} partitions",
                self.subscribe_infos.len(),
                self.partitions.len()
            ));
        }

        for (key, partition) in &self.partitions {
            if partition.key() != key {
                return Err(format!("partition {} stored under key {}", partition, key));
            }
            if !self.subscribe_infos.contains_key(key) {
                return Err(format!("partition {} has no subscribe info", key));
            }
            let in_topic = self
                .topic_partitions
                .get(partition.topic())
                .is_some_and(|keys| keys.contains(key));
            if !in_topic {
                return Err(format!("partition {} missing from topic index", key));
            }
            let in_broker = self
                .broker_partitions
                .get(partition.broker())
                .is_some_and(|keys| keys.contains(key));
            if !in_broker {
                return Err(format!("partition {} missing from broker index", key));
            }
        }

        for (topic, keys) in &self.topic_partitions {
            if keys.is_empty() {
                return Err(format!("empty topic bucket {}", topic));
            }
            for key in keys {
                match self.partitions.get(key) {
                    Some(p) if p.topic() == &**topic => {}
                    Some(_) => return Err(format!("key {} indexed under wrong topic {}", key, topic)),
                    None => return Err(format!("orphaned key {} in topic index", key)),
                }
            }
        }

        for (broker, keys) in &self.broker_partitions {
            if keys.is_empty() {
                return Err(format!("empty broker bucket {}", broker));
            }
            for key in keys {
                match self.partitions.get(key) {
                    Some(p) if p.broker() == broker => {}
                    Some(_) => {
                        return Err(format!("key {} indexed under wrong broker {}", key, broker));
                    }
                    None => return Err(format!("orphaned key {} in broker index", key)),
                }
            }
        }

        Ok(())
    }
}
