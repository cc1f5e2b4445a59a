//! In-memory partition assignment cache.
//!
//! # Architecture
//!
//! ```text
//!   protocol client                                consumer threads
//!   ───────────────                                ────────────────
//!   add_partition / remove_*  ─┐            ┌──── take_idle_partition
//!                              ▼            ▼     release_partition
//!                     ┌─────────────────────────┐
//!                     │ meta (Mutex)            │ ◄── ExpirySweeper
//!                     │  PartitionRegistry      │     (sweep_expired)
//!                     │  AllocationPool         │ ◄── ExpiryTimer (per checkout)
//!                     └─────────────────────────┘
//!
//!   offer_event_and_notify ──► EventQueue ──► channel (cap 1) ──► EventReceiver
//!   is_first_registration  ──► RegistrationLedger (DashMap)
//!   set_consumer_info      ──► SessionState (RwLock)
//! ```
//!
//! # Components
//!
//! - [`PartitionCache`]: the facade; every operation below goes through it
//! - [`PartitionRegistry`]: partitions, subscribe infos, topic and broker indices
//! - [`AllocationPool`]: idle FIFO and checkouts
//! - [`EventQueue`] / [`EventReceiver`]: rebalance events and their delivery
//! - [`RegistrationLedger`]: first-registration bookkeeping
//! - [`SessionState`]: consumer identity and flow-control ids
//! - [`ExpirySweeper`]: periodic reclamation of expired checkouts

mod allocation;
mod clock;
mod config;
mod data_cache;
mod event_queue;
mod expiry_timer;
mod ledger;
pub mod metrics;
mod registry;
mod session;
mod sweeper;

pub use allocation::{AllocationPool, Checkout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use data_cache::{BrokerPartitions, PartitionCache};
pub use event_queue::{EventQueue, EventReceiver};
pub use expiry_timer::ExpiryTimer;
pub use ledger::RegistrationLedger;
pub use registry::PartitionRegistry;
pub use session::SessionState;
pub use sweeper::ExpirySweeper;
