//! Centralized constants and configuration defaults.
//!
//! # Categories
//!
//! - **Identity Constants**: sentinel values and key formatting
//! - **Allocation Constants**: checkout lease and sweep defaults
//! - **Event Constants**: rebalance event delivery

// =============================================================================
// Identity Constants
// =============================================================================

/// Sentinel for flow-control and priority identifiers that have not been
/// assigned by the master yet.
pub const INVALID_VALUE: i64 = -2;

/// Separator between the components of a partition key.
pub const PARTITION_KEY_SEPARATOR: char = ':';

// =============================================================================
// Allocation Constants
// =============================================================================

/// Default maximum time a partition may stay checked out before the sweep
/// reclaims it (60 seconds).
pub const DEFAULT_MAX_CHECKOUT_AGE_MS: u64 = 60_000;

/// Default interval between expiry sweeps (1 second).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Checkout expiry timers are armed by default.
pub const DEFAULT_CHECKOUT_TIMERS_ENABLED: bool = true;

// =============================================================================
// Event Constants
// =============================================================================

/// Capacity of the rebalance event delivery channel.
///
/// At most one event may be delivered but not yet received.
pub const EVENT_CHANNEL_CAPACITY: usize = 1;
