//! Checkout expiry: the sweep at exact millisecond boundaries, and per-checkout
//! timers on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use leasehold::prelude::*;

const LEASE_MS: u64 = 1_000;

fn sweep_only_cache(clock: &ManualClock) -> PartitionCache {
    let config = CacheConfig {
        max_checkout_age: Duration::from_millis(LEASE_MS),
        checkout_timers_enabled: false,
        ..Default::default()
    };
    let (cache, _events) = PartitionCache::with_clock(config, Arc::new(clock.clone()));
    cache
}

fn timer_cache(lease: Duration) -> PartitionCache {
    let config = CacheConfig {
        max_checkout_age: lease,
        sweep_interval: lease,
        checkout_timers_enabled: true,
    };
    let (cache, _events) = PartitionCache::new(config);
    cache
}

fn register(cache: &PartitionCache, count: i32) -> Vec<Arc<Partition>> {
    let broker = NodeRef::new(Node::new(1, "10.0.0.1", 8123));
    (0..count)
        .map(|i| {
            let p = Partition::new(broker.clone(), "t", i).shared();
            cache.add_partition(p.clone());
            p
        })
        .collect()
}

// ============================================================================
// Sweep
// ============================================================================

#[test]
fn test_sweep_boundary_minus_one_keeps_checkout() {
    let clock = ManualClock::new(1_000_000);
    let cache = sweep_only_cache(&clock);
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();

    clock.advance(Duration::from_millis(LEASE_MS - 1));
    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 0);
    assert!(cache.is_used(p.key()));
}

#[test]
fn test_sweep_boundary_plus_one_reclaims() {
    let clock = ManualClock::new(1_000_000);
    let cache = sweep_only_cache(&clock);
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();
    p.set_last_consumed(true);

    clock.advance(Duration::from_millis(LEASE_MS + 1));
    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 1);
    assert!(!cache.is_used(p.key()));
    assert_eq!(cache.idle_partition_keys(), vec![p.key().clone()]);
    assert!(!p.last_consumed());
    cache.check_invariants().unwrap();
}

#[test]
fn test_sweep_reclaims_only_overdue_checkouts() {
    let clock = ManualClock::new(0);
    let cache = sweep_only_cache(&clock);
    let partitions = register(&cache, 3);

    cache.take_idle_partition().unwrap();
    clock.advance(Duration::from_millis(600));
    cache.take_idle_partition().unwrap();
    clock.advance(Duration::from_millis(600));

    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 1);
    assert!(cache.is_idle(partitions[0].key()));
    assert!(cache.is_used(partitions[1].key()));
    assert_eq!(
        cache.idle_partition_keys(),
        vec![partitions[2].key().clone(), partitions[0].key().clone()],
        "reclaimed partition joins the idle tail"
    );
}

#[test]
fn test_sweep_after_release_is_noop() {
    let clock = ManualClock::new(0);
    let cache = sweep_only_cache(&clock);
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();
    cache.release_partition(p.key(), true);

    clock.advance(Duration::from_millis(LEASE_MS * 10));
    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 0);
    assert!(p.last_consumed());
    assert_eq!(cache.idle_partition_keys().len(), 1);
}

#[test]
fn test_sweep_does_not_requeue_removed_partition() {
    let clock = ManualClock::new(0);
    let cache = sweep_only_cache(&clock);
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();
    cache.remove_partitions(&[p.key().clone()]);

    clock.advance(Duration::from_millis(LEASE_MS * 2));
    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 0);
    assert!(cache.idle_partition_keys().is_empty());
    cache.check_invariants().unwrap();
}

#[test]
fn test_checkout_outside_runtime_relies_on_sweep() {
    let clock = ManualClock::new(0);
    let config = CacheConfig {
        max_checkout_age: Duration::from_millis(LEASE_MS),
        checkout_timers_enabled: true,
        ..Default::default()
    };
    let (cache, _events) = PartitionCache::with_clock(config, Arc::new(clock.clone()));
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();

    clock.advance(Duration::from_millis(LEASE_MS + 1));
    assert_eq!(cache.sweep_expired(Duration::from_millis(LEASE_MS)), 1);
    assert!(cache.is_idle(p.key()));
}

// ============================================================================
// Timers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timer_reclaims_overrun_checkout() {
    let cache = timer_cache(Duration::from_millis(100));
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();
    p.set_last_consumed(true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.is_used(p.key()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert!(cache.is_idle(p.key()));
    assert!(!p.last_consumed());
    cache.check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_returned_partition_is_not_reclaimed_by_old_timer() {
    let cache = timer_cache(Duration::from_millis(100));
    let p = register(&cache, 1).remove(0);

    cache.take_idle_partition().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    cache.release_partition(p.key(), true);
    cache.take_idle_partition().unwrap();

    // First checkout's lease would have ended at 100ms; the second one runs to 160ms.
    tokio::time::sleep(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;
    assert!(cache.is_used(p.key()));
    assert!(p.last_consumed());

    tokio::time::sleep(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;
    assert!(cache.is_idle(p.key()));
}

#[tokio::test(start_paused = true)]
async fn test_timer_after_sweep_is_harmless() {
    let clock = ManualClock::new(0);
    let config = CacheConfig {
        max_checkout_age: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(100),
        checkout_timers_enabled: true,
    };
    let (cache, _events) = PartitionCache::with_clock(config, Arc::new(clock.clone()));
    let partitions = register(&cache, 2);
    cache.take_idle_partition().unwrap();

    clock.advance(Duration::from_millis(101));
    assert_eq!(cache.sweep_expired(Duration::from_millis(100)), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        cache.idle_partition_keys(),
        vec![partitions[1].key().clone(), partitions[0].key().clone()]
    );
    cache.check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removed_partition_timer_does_not_requeue() {
    let cache = timer_cache(Duration::from_millis(100));
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();
    cache.remove_partitions(&[p.key().clone()]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert!(cache.idle_partition_keys().is_empty());
    assert_eq!(cache.registered_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_outliving_cache_is_harmless() {
    let cache = timer_cache(Duration::from_millis(100));
    register(&cache, 1);
    cache.take_idle_partition().unwrap();
    drop(cache);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_drives_expiry() {
    let clock = ManualClock::new(0);
    let config = CacheConfig {
        max_checkout_age: Duration::from_millis(500),
        sweep_interval: Duration::from_millis(100),
        checkout_timers_enabled: false,
    };
    let (cache, _events) = PartitionCache::with_clock(config, Arc::new(clock.clone()));
    let cache = Arc::new(cache);
    let p = register(&cache, 1).remove(0);
    cache.take_idle_partition().unwrap();

    let sweeper = ExpirySweeper::from_config(cache.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.is_used(p.key()));

    clock.advance(Duration::from_millis(501));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.is_idle(p.key()));

    sweeper.shutdown().await;
}
