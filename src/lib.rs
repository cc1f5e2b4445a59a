//! # Leasehold
//! Consumer-side partition assignment cache for pub/sub message-queue clients.
//!
//! The cache tracks which topic partitions the local consumer owns, hands them
//! out to consuming threads in first-in first-out order, reclaims partitions
//! whose checkout lease has expired, and buffers group-rebalance events for the
//! consuming thread. It performs no network I/O: a protocol client feeds it
//! partitions and events and reads back what it needs to report.
//!
//! ## Getting started
//! ```toml
//! leasehold = "0.1"
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasehold::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_env()?;
//!     let (cache, mut events) = PartitionCache::new(config);
//!     let cache = Arc::new(cache);
//!     let sweeper = ExpirySweeper::from_config(cache.clone());
//!
//!     cache.set_consumer_info("consumer-1", "billing");
//!     let broker = NodeRef::new(Node::new(1, "10.0.0.1", 8123));
//!     cache.add_partition(Partition::new(broker, "invoices", 0).shared());
//!
//!     if let Some(partition) = cache.take_idle_partition() {
//!         // fetch from partition.broker() ...
//!         cache.release_partition(partition.key(), true);
//!     }
//!
//!     cache
//!         .offer_event_and_notify(ConsumerEvent::new(1, EventType::Disconnect, vec![]))
//!         .await?;
//!     let event = events.recv().await;
//!     println!("rebalance: {:?}", event.map(|e| e.event_type));
//!
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//! - [`cache`]: the cache and its components
//! - [`types`]: partitions, broker nodes, subscriptions and rebalance events
//! - [`error`]: error type
//! - [`telemetry`]: logging setup

#![forbid(unsafe_code)]

pub mod cache;
pub mod constants;
pub mod error;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Commonly used types.
    pub use crate::cache::{
        BrokerPartitions, CacheConfig, Clock, EventReceiver, ExpirySweeper, ManualClock,
        PartitionCache, SystemClock,
    };
    pub use crate::error::{CacheError, Result};
    pub use crate::types::{
        BrokerId, ConsumerEvent, EventStatus, EventType, Node, NodeRef, Partition,
        PartitionKey, SubscribeInfo, partition_key,
    };
}
