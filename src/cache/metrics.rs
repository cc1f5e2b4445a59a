//! Prometheus metrics for the partition cache.
//!
//! Metrics cover:
//! - Allocation state (registered, idle and checked-out partitions)
//! - Reclamations by reason (returned, expired by sweep, expired by timer)
//! - Removals by mode (commit, rollback, admin)
//! - Rebalance event flow (offered, delivered, pending)
//! - Expiry sweep latency
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "leasehold" prefix to avoid
//! name collisions with the embedding application's metrics.
//! Registration errors are handled gracefully - if a metric fails to register,
//! an unregistered fallback is used instead of panicking.
//!
//! Gauges are process-wide: with several caches in one process they reflect
//! whichever cache updated them last.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for cache metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("leasehold".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntGauge metric.
macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare a Histogram metric with buckets.
macro_rules! define_histogram {
    ($name:ident, $metric_name:expr, $help:expr, [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<Histogram> = Lazy::new(|| {
            register_histogram_safe(&REGISTRY, $metric_name, $help, vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Allocation metrics
// =============================================================================

define_gauge!(
    REGISTERED_PARTITIONS,
    "registered_partitions",
    "Number of partitions currently registered in the cache"
);
define_gauge!(
    IDLE_PARTITIONS,
    "idle_partitions",
    "Number of partitions waiting to be handed out"
);
define_gauge!(
    USED_PARTITIONS,
    "used_partitions",
    "Number of partitions currently checked out by consumers"
);
define_counter!(
    PARTITIONS_REGISTERED,
    "partitions_registered_total",
    "Total number of newly registered partitions"
);
define_counter_vec!(
    PARTITIONS_REMOVED,
    "partitions_removed_total",
    "Total number of partitions removed from the cache",
    ["mode"]
);
define_counter_vec!(
    PARTITIONS_RECLAIMED,
    "partitions_reclaimed_total",
    "Total number of checked-out partitions reclaimed",
    ["reason"]
);
define_counter!(
    FIRST_REGISTRATIONS,
    "first_registrations_total",
    "Total number of partition keys seen for the first time by the registration ledger"
);

// =============================================================================
// Sweep metrics
// =============================================================================

define_histogram!(
    SWEEP_DURATION,
    "sweep_duration_seconds",
    "Expiry sweep duration in seconds",
    [0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
);

// =============================================================================
// Event metrics
// =============================================================================

define_gauge!(
    PENDING_EVENTS,
    "pending_events",
    "Number of rebalance events waiting in the queue"
);
define_counter_vec!(
    EVENTS_OFFERED,
    "events_offered_total",
    "Total number of rebalance events offered",
    ["path"]
);
define_counter!(
    EVENTS_DELIVERED,
    "events_delivered_total",
    "Total number of rebalance events sent on the delivery channel"
);

// =============================================================================
// Safe registration helpers
// =============================================================================

/// Register an IntGauge safely, returning a fallback on error.
fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

/// Register an IntCounter safely, returning a fallback on error.
fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

/// Register a Histogram safely, returning a fallback on error.
fn register_histogram_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    buckets: Vec<f64>,
) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register Histogram metric, using unregistered fallback");
            histogram
        }
    }
}

/// Initialize the metrics registry by registering all metrics.
///
/// Idempotent. Metrics are otherwise registered lazily on first use.
pub fn init_metrics() {
    let _ = &*REGISTERED_PARTITIONS;
    let _ = &*IDLE_PARTITIONS;
    let _ = &*USED_PARTITIONS;
    let _ = &*PARTITIONS_REGISTERED;
    let _ = &*PARTITIONS_REMOVED;
    let _ = &*PARTITIONS_RECLAIMED;
    let _ = &*FIRST_REGISTRATIONS;
    let _ = &*SWEEP_DURATION;
    let _ = &*PENDING_EVENTS;
    let _ = &*EVENTS_OFFERED;
    let _ = &*EVENTS_DELIVERED;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Gather all metric families from the registry.
pub fn gather_metrics() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

/// Publish the current allocation sizes.
pub fn set_allocation_state(registered: usize, idle: usize, used: usize) {
    REGISTERED_PARTITIONS.set(registered as i64);
    IDLE_PARTITIONS.set(idle as i64);
    USED_PARTITIONS.set(used as i64);
}

pub fn record_partition_registered() {
    PARTITIONS_REGISTERED.inc();
}

/// Record removed partitions. `mode` is "commit", "rollback" or "admin".
pub fn record_partitions_removed(mode: &str, count: usize) {
    if count > 0 {
        PARTITIONS_REMOVED
            .with_label_values(&[mode])
            .inc_by(count as u64);
    }
}

/// Record a reclaimed checkout. `reason` is "returned", "expired" or "timer".
pub fn record_reclaim(reason: &str) {
    PARTITIONS_RECLAIMED.with_label_values(&[reason]).inc();
}

pub fn record_first_registration() {
    FIRST_REGISTRATIONS.inc();
}

pub fn record_sweep(duration_secs: f64) {
    SWEEP_DURATION.observe(duration_secs);
}

/// Record an offered event. `path` is "queued" or "notify".
pub fn record_event_offered(path: &str) {
    EVENTS_OFFERED.with_label_values(&[path]).inc();
}

pub fn record_event_delivered() {
    EVENTS_DELIVERED.inc();
}

pub fn set_pending_events(count: usize) {
    PENDING_EVENTS.set(count as i64);
}
