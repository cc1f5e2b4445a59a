//! Domain types shared between the cache and its protocol-side collaborators.
//!
//! The protocol client produces these values (from broker metadata and
//! coordinator responses) and the cache stores and hands them back out.
//!
//! # Identity vs. equality
//!
//! [`Node`] is plain data and compares structurally. The cache, however, groups
//! partitions by [`NodeRef`], which compares by *reference identity*: two
//! `NodeRef`s built from separate `Node` values describing the same broker are
//! different keys. Always look partitions up with the exact `NodeRef` they were
//! registered with.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::PARTITION_KEY_SEPARATOR;

/// Unique key of a partition, `"{broker_id}:{topic}:{partition_id}"`.
///
/// Uses `Arc<str>` so keys can be cloned into several indices without
/// reallocating the string.
pub type PartitionKey = Arc<str>;

/// A broker identifier as assigned by the cluster master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BrokerId(pub u32);

impl BrokerId {
    #[inline]
    pub const fn new(value: u32) -> Self {
        BrokerId(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for BrokerId {
    fn from(value: u32) -> Self {
        BrokerId(value)
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker endpoint description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(broker_id: impl Into<BrokerId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            broker_id: broker_id.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` of the broker.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared handle to a [`Node`] that hashes and compares by identity.
///
/// Cloning a `NodeRef` yields the *same* identity. Wrapping a second, equal
/// `Node` with [`NodeRef::new`] yields a distinct one.
#[derive(Debug, Clone)]
pub struct NodeRef(Arc<Node>);

impl NodeRef {
    pub fn new(node: Node) -> Self {
        NodeRef(Arc::new(node))
    }

    /// Whether `self` and `other` are the same node object.
    #[inline]
    pub fn same_as(&self, other: &NodeRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.0
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.broker_id, self.address())
    }
}

/// A topic partition served by one broker.
///
/// Partitions are shared as `Arc<Partition>` between the registry, subscribe
/// infos, events and consumers. The last-consumed flag is the only mutable
/// field and every holder observes updates to it.
#[derive(Debug)]
pub struct Partition {
    key: PartitionKey,
    topic: Arc<str>,
    broker: NodeRef,
    partition_id: i32,
    last_consumed: AtomicBool,
}

impl Partition {
    pub fn new(broker: NodeRef, topic: impl Into<Arc<str>>, partition_id: i32) -> Self {
        let topic = topic.into();
        let key = partition_key(broker.broker_id, &topic, partition_id);
        Self {
            key,
            topic,
            broker,
            partition_id,
            last_consumed: AtomicBool::new(false),
        }
    }

    /// Wrap in an `Arc` for registration.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[inline]
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn broker(&self) -> &NodeRef {
        &self.broker
    }

    #[inline]
    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    /// Whether a future consumer of this partition may resume where the
    /// previous one left off (`true`) or must restart from a safe point.
    pub fn last_consumed(&self) -> bool {
        self.last_consumed.load(Ordering::Acquire)
    }

    pub fn set_last_consumed(&self, value: bool) {
        self.last_consumed.store(value, Ordering::Release);
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Build the key of a partition.
pub fn partition_key(broker_id: BrokerId, topic: &str, partition_id: i32) -> PartitionKey {
    let sep = PARTITION_KEY_SEPARATOR;
    Arc::from(format!("{broker_id}{sep}{topic}{sep}{partition_id}"))
}

/// Record that a consumer of a group subscribes to a partition.
#[derive(Debug, Clone)]
pub struct SubscribeInfo {
    consumer_id: String,
    group: String,
    partition: Arc<Partition>,
}

impl SubscribeInfo {
    pub fn new(
        consumer_id: impl Into<String>,
        group: impl Into<String>,
        partition: Arc<Partition>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            group: group.into(),
            partition,
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    pub fn partition_key(&self) -> &PartitionKey {
        self.partition.key()
    }
}

/// Kind of rebalance instruction sent by the group coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Register to the listed partitions.
    Connect,
    /// Unregister from the listed partitions.
    Disconnect,
    /// Report the current subscription back to the coordinator.
    Report,
    /// Refresh partition metadata.
    Refresh,
    /// Abort the in-progress rebalance.
    StopRebalance,
    /// Register without a preceding disconnect phase.
    OnlyConnect,
    /// Unregister without a following connect phase.
    OnlyDisconnect,
    Unknown,
}

impl EventType {
    /// Wire code used by the coordinator.
    pub fn code(self) -> i32 {
        match self {
            EventType::Connect => 1,
            EventType::Disconnect => 2,
            EventType::Report => 3,
            EventType::Refresh => 4,
            EventType::StopRebalance => 5,
            EventType::OnlyConnect => 10,
            EventType::OnlyDisconnect => 20,
            EventType::Unknown => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => EventType::Connect,
            2 => EventType::Disconnect,
            3 => EventType::Report,
            4 => EventType::Refresh,
            5 => EventType::StopRebalance,
            10 => EventType::OnlyConnect,
            20 => EventType::OnlyDisconnect,
            _ => EventType::Unknown,
        }
    }
}

/// Processing status of a rebalance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventStatus {
    #[default]
    Todo,
    Processing,
    Done,
    Failed,
}

impl EventStatus {
    pub fn code(self) -> i32 {
        match self {
            EventStatus::Todo => 0,
            EventStatus::Processing => 1,
            EventStatus::Done => 2,
            EventStatus::Failed => -1,
        }
    }
}

/// A rebalance instruction queued for the consuming thread.
#[derive(Debug, Clone)]
pub struct ConsumerEvent {
    pub rebalance_id: i64,
    pub event_type: EventType,
    pub status: EventStatus,
    pub subscribe_infos: Vec<SubscribeInfo>,
}

impl ConsumerEvent {
    pub fn new(rebalance_id: i64, event_type: EventType, subscribe_infos: Vec<SubscribeInfo>) -> Self {
        Self {
            rebalance_id,
            event_type,
            status: EventStatus::Todo,
            subscribe_infos,
        }
    }
}
