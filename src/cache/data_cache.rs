//! The partition cache: registry, allocation pool, event queue, ledger and
//! session state behind one handle.
//!
//! # Locking
//!
//! | State                         | Guard                                   |
//! |-------------------------------|-----------------------------------------|
//! | registry + allocation pool    | `meta` (`std::sync::Mutex`)             |
//! | pending rebalance events      | event queue lock (see [`EventQueue`])   |
//! | registration ledger           | `DashMap` per-key entry lock            |
//! | session identity              | `RwLock`                                |
//!
//! Each public operation is atomic with respect to its own guard only; no
//! operation spans two guards. Registry and allocation changes that belong
//! together (registration + idle hand-off, removal + reclamation, the expiry
//! sweep) always happen under one acquisition of `meta`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::allocation::AllocationPool;
use super::clock::{Clock, SystemClock, duration_millis};
use super::config::CacheConfig;
use super::event_queue::{EventQueue, EventReceiver};
use super::expiry_timer::ExpiryTimer;
use super::ledger::RegistrationLedger;
use super::metrics;
use super::registry::PartitionRegistry;
use super::session::SessionState;
use crate::error::{CacheError, Result};
use crate::types::{ConsumerEvent, NodeRef, Partition, PartitionKey, SubscribeInfo};

/// Removed partitions grouped by the broker they were registered under.
pub type BrokerPartitions = HashMap<NodeRef, Vec<Arc<Partition>>>;

#[derive(Debug, Default)]
struct MetaState {
    registry: PartitionRegistry,
    pool: AllocationPool,
}

impl MetaState {
    /// End any checkout of `key` and drop it from the idle sequence; with
    /// `requeue`, put it back at the idle tail if it is still registered.
    ///
    /// Every idle/used transition other than a checkout goes through here.
    /// Returns whether a checkout was ended.
    fn reclaim(&mut self, key: &str, requeue: bool) -> bool {
        let released = self.pool.release(key).is_some();
        if requeue {
            if let Some(partition) = self.registry.get(key) {
                self.pool.push_idle(partition.key().clone());
            }
        }
        released
    }

    /// Drop `key` from the registry, its indices and the allocation pool.
    fn remove(&mut self, key: &str) -> Option<Arc<Partition>> {
        let partition = self.registry.remove(key);
        self.reclaim(key, false);
        partition
    }

    fn publish_gauges(&self) {
        metrics::set_allocation_state(
            self.registry.len(),
            self.pool.idle_len(),
            self.pool.used_len(),
        );
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        self.registry.check_consistency()?;
        self.pool.check_consistency()?;
        for key in self.pool.idle_keys() {
            if !self.registry.contains(&key) {
                return Err(format!("idle partition {} is not registered", key));
            }
        }
        for key in self.pool.used_keys() {
            if !self.registry.contains(&key) {
                return Err(format!("used partition {} is not registered", key));
            }
        }
        Ok(())
    }
}

fn lock_meta(meta: &Mutex<MetaState>) -> MutexGuard<'_, MetaState> {
    meta.lock().unwrap_or_else(|e| e.into_inner())
}

/// Timer callback: reclaim the checkout it was armed for, if still live.
fn expire_checkout(meta: &Weak<Mutex<MetaState>>, key: &str, token: u64) {
    let Some(meta) = meta.upgrade() else {
        return;
    };
    let mut state = lock_meta(&meta);
    if state.pool.checkout_token(key) != Some(token) {
        trace!(partition_key = key, token, "Ignoring stale checkout timer");
        return;
    }
    if let Some(partition) = state.registry.get(key) {
        partition.set_last_consumed(false);
    }
    state.reclaim(key, true);
    state.publish_gauges();
    metrics::record_reclaim("timer");
    debug!(partition_key = key, "Checkout lease expired, partition requeued");
}

/// Consumer-side partition assignment cache.
///
/// Created with its [`EventReceiver`], which the consuming thread uses to
/// wait for rebalance events:
///
/// ```rust
/// use leasehold::cache::{CacheConfig, PartitionCache};
/// use leasehold::types::{Node, NodeRef, Partition};
///
/// let (cache, _events) = PartitionCache::new(CacheConfig::default());
/// cache.set_consumer_info("consumer-1", "group-1");
///
/// let broker = NodeRef::new(Node::new(1, "10.0.0.1", 8123));
/// cache.add_partition(Partition::new(broker, "orders", 0).shared());
///
/// let partition = cache.take_idle_partition().expect("one idle partition");
/// // ... consume ...
/// cache.release_partition(partition.key(), true);
/// ```
#[derive(Debug)]
pub struct PartitionCache {
    meta: Arc<Mutex<MetaState>>,
    events: EventQueue,
    ledger: RegistrationLedger,
    session: SessionState,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl PartitionCache {
    pub fn new(config: CacheConfig) -> (Self, EventReceiver) {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache that reads checkout times from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> (Self, EventReceiver) {
        let (events, receiver) = EventQueue::new();
        info!(
            max_checkout_age_ms = duration_millis(config.max_checkout_age),
            checkout_timers = config.checkout_timers_enabled,
            "Partition cache created"
        );
        let cache = Self {
            meta: Arc::new(Mutex::new(MetaState::default())),
            events,
            ledger: RegistrationLedger::new(),
            session: SessionState::new(),
            clock,
            config,
        };
        (cache, receiver)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MetaState> {
        lock_meta(&self.meta)
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn set_consumer_info(&self, consumer_id: impl Into<String>, group: impl Into<String>) {
        self.session.set_consumer_info(consumer_id, group);
    }

    pub fn consumer_id(&self) -> String {
        self.session.consumer_id()
    }

    pub fn group_name(&self) -> String {
        self.session.group_name()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register a partition and make it available for hand-out.
    ///
    /// A new key gets a [`SubscribeInfo`] bound to the current consumer id and
    /// group. A key that is already registered keeps its original partition
    /// and subscription; it is moved to the idle tail (ending any checkout).
    /// Returns `true` if the key was new.
    pub fn add_partition(&self, partition: Arc<Partition>) -> bool {
        let (consumer_id, group) = self.session.identity();
        let key = partition.key().clone();
        let topic = partition.topic().to_string();
        let subscribe_info = SubscribeInfo::new(consumer_id, group, partition);

        let mut state = self.lock();
        let inserted = state.registry.insert(subscribe_info);
        state.reclaim(&key, true);
        state.publish_gauges();
        drop(state);

        if inserted {
            metrics::record_partition_registered();
            debug!(partition_key = %key, topic = %topic, "Registered partition");
        } else {
            trace!(partition_key = %key, "Partition already registered, requeued");
        }
        inserted
    }

    /// Remove the partitions of `subscribe_infos`, grouping the removed
    /// partitions by broker into `removed`.
    ///
    /// Partitions that are checked out get their last-consumed flag set to
    /// `!rollback`. Within a broker, partitions keep the order of
    /// `subscribe_infos`. Unknown keys are skipped.
    pub fn remove_and_get_partitions(
        &self,
        subscribe_infos: &[SubscribeInfo],
        rollback: bool,
        removed: &mut BrokerPartitions,
    ) {
        if subscribe_infos.is_empty() {
            return;
        }
        let mut count = 0;
        let mut state = self.lock();
        for sub in subscribe_infos {
            let key = sub.partition_key();
            if let Some(partition) = state.registry.get(key).cloned() {
                if state.pool.is_used(key) {
                    partition.set_last_consumed(!rollback);
                }
                removed
                    .entry(partition.broker().clone())
                    .or_default()
                    .push(partition);
                count += 1;
            }
            state.remove(key);
        }
        state.publish_gauges();
        drop(state);

        metrics::record_partitions_removed(if rollback { "rollback" } else { "commit" }, count);
        debug!(
            requested = subscribe_infos.len(),
            removed = count,
            rollback,
            "Removed partitions"
        );
    }

    /// Remove partitions by key. Returns how many were registered.
    pub fn remove_partitions<K: AsRef<str>>(&self, keys: &[K]) -> usize {
        let mut state = self.lock();
        let count = keys
            .iter()
            .filter(|key| state.remove(key.as_ref()).is_some())
            .count();
        state.publish_gauges();
        drop(state);

        metrics::record_partitions_removed("admin", count);
        debug!(requested = keys.len(), removed = count, "Removed partitions by key");
        count
    }

    /// Partitions registered under exactly this broker reference.
    pub fn partitions_for_broker(&self, broker: &NodeRef) -> Vec<Arc<Partition>> {
        self.lock().registry.partitions_for_broker(broker)
    }

    pub fn partitions_for_topic(&self, topic: &str) -> Vec<Arc<Partition>> {
        self.lock().registry.partitions_for_topic(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().registry.topics()
    }

    /// The offered partitions whose keys are not registered, in input order.
    pub fn unsubscribed_of(&self, subscribe_infos: &[SubscribeInfo]) -> Vec<Arc<Partition>> {
        let state = self.lock();
        if state.registry.is_empty() {
            return subscribe_infos
                .iter()
                .map(|sub| sub.partition().clone())
                .collect();
        }
        subscribe_infos
            .iter()
            .filter(|sub| !state.registry.contains(sub.partition_key()))
            .map(|sub| sub.partition().clone())
            .collect()
    }

    pub fn subscribe_infos(&self) -> Vec<SubscribeInfo> {
        self.lock().registry.subscribe_infos()
    }

    pub fn subscribe_info(&self, key: &str) -> Option<SubscribeInfo> {
        self.lock().registry.subscribe_info(key).cloned()
    }

    pub fn partition(&self, key: &str) -> Option<Arc<Partition>> {
        self.lock().registry.get(key).cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.lock().registry.len()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Hand out the oldest idle partition, checking it out.
    pub fn take_idle_partition(&self) -> Option<Arc<Partition>> {
        let mut state = self.lock();
        while let Some(key) = state.pool.pop_idle() {
            match state.registry.get(&key).cloned() {
                Some(partition) => {
                    self.check_out(&mut state, key);
                    state.publish_gauges();
                    return Some(partition);
                }
                None => warn!(partition_key = %key, "Dropping unregistered idle partition"),
            }
        }
        None
    }

    /// Check out a specific registered partition. Returns `false` if the key
    /// is unknown or already checked out.
    pub fn mark_used(&self, key: &str) -> bool {
        let mut state = self.lock();
        let Some(key) = state.registry.get(key).map(|p| p.key().clone()) else {
            return false;
        };
        if state.pool.is_used(&key) {
            return false;
        }
        self.check_out(&mut state, key);
        state.publish_gauges();
        true
    }

    fn check_out(&self, state: &mut MetaState, key: PartitionKey) {
        let token = state.pool.check_out(key.clone(), self.clock.now_millis());
        if !self.config.checkout_timers_enabled {
            return;
        }
        let meta = Arc::downgrade(&self.meta);
        let timer_key = key.clone();
        let timer = ExpiryTimer::arm(self.config.max_checkout_age, move || {
            expire_checkout(&meta, &timer_key, token)
        });
        match timer {
            Some(timer) => state.pool.attach_timer(&key, token, timer),
            None => trace!(partition_key = %key, "No runtime for checkout timer, relying on sweep"),
        }
    }

    /// A consumer hands a partition back. Records `last_consumed` on the
    /// partition and requeues it. Returns `false` (and changes nothing) if
    /// the partition was not checked out.
    pub fn release_partition(&self, key: &str, last_consumed: bool) -> bool {
        let mut state = self.lock();
        if !state.pool.is_used(key) {
            return false;
        }
        if let Some(partition) = state.registry.get(key) {
            partition.set_last_consumed(last_consumed);
        }
        state.reclaim(key, true);
        state.publish_gauges();
        drop(state);

        metrics::record_reclaim("returned");
        trace!(partition_key = key, last_consumed, "Partition returned");
        true
    }

    /// End any checkout of `key`, cancel its timer and take it out of the
    /// idle sequence; with `requeue` and if still registered, append it at the
    /// idle tail. Unknown keys are a no-op. Returns whether a checkout ended.
    pub fn reclaim(&self, key: &str, requeue: bool) -> bool {
        let mut state = self.lock();
        let released = state.reclaim(key, requeue);
        state.publish_gauges();
        released
    }

    /// Reclaim every checkout older than `max_age` (strictly, in
    /// milliseconds), flag its partition as not last-consumed and requeue it.
    /// Returns the number of reclaimed partitions.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let started = Instant::now();
        let max_age_millis = duration_millis(max_age);

        let mut state = self.lock();
        let now = self.clock.now_millis();
        let expired = state.pool.expired(now, max_age_millis);
        for key in &expired {
            if let Some(partition) = state.registry.get(key) {
                partition.set_last_consumed(false);
            }
        }
        for key in &expired {
            state.reclaim(key, true);
            metrics::record_reclaim("expired");
        }
        state.publish_gauges();
        drop(state);

        metrics::record_sweep(started.elapsed().as_secs_f64());
        if !expired.is_empty() {
            info!(
                reclaimed = expired.len(),
                max_age_ms = max_age_millis,
                "Reclaimed expired partition checkouts"
            );
        }
        expired.len()
    }

    pub fn idle_partition_keys(&self) -> Vec<PartitionKey> {
        self.lock().pool.idle_keys()
    }

    pub fn used_partition_keys(&self) -> Vec<PartitionKey> {
        self.lock().pool.used_keys()
    }

    pub fn is_idle(&self, key: &str) -> bool {
        self.lock().pool.is_idle(key)
    }

    pub fn is_used(&self, key: &str) -> bool {
        self.lock().pool.is_used(key)
    }

    /// Epoch milliseconds at which `key` was checked out.
    pub fn checkout_time(&self, key: &str) -> Option<u64> {
        self.lock().pool.checkout_time(key)
    }

    /// Verify index consistency and allocation exclusivity.
    pub fn check_invariants(&self) -> Result<()> {
        self.lock()
            .check_consistency()
            .map_err(CacheError::InvariantViolation)
    }

    // =========================================================================
    // Rebalance events
    // =========================================================================

    pub fn offer_event(&self, event: ConsumerEvent) {
        self.events.offer(event);
    }

    pub fn poll_event(&self) -> Option<ConsumerEvent> {
        self.events.poll()
    }

    /// See [`EventQueue::offer_and_notify`].
    pub async fn offer_event_and_notify(&self, event: ConsumerEvent) -> Result<()> {
        self.events.offer_and_notify(event).await
    }

    /// See [`EventQueue::blocking_offer_and_notify`].
    pub fn blocking_offer_event_and_notify(&self, event: ConsumerEvent) -> Result<()> {
        self.events.blocking_offer_and_notify(event)
    }

    pub fn clear_events(&self) {
        self.events.clear();
    }

    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    // =========================================================================
    // Registration ledger
    // =========================================================================

    /// See [`RegistrationLedger::is_first_registration`].
    pub fn is_first_registration(&self, key: &str) -> bool {
        self.ledger.is_first_registration(key)
    }
}
