//! A simulated consumer driving the partition cache.
//!
//! A fake coordinator registers partitions spread over two brokers and later
//! issues a rebalance that revokes one broker's partitions. Worker tasks take
//! idle partitions, "consume" them and hand them back; one worker stalls so
//! its lease expires and the sweeper reclaims the partition.
//!
//! ## Running
//!
//! ```bash
//! cargo run --example consumer_loop
//! ```
//!
//! With JSON logs and a longer lease:
//! ```bash
//! LOG_FORMAT=json LEASEHOLD_MAX_CHECKOUT_AGE_MS=800 LEASEHOLD_SWEEP_INTERVAL_MS=200 \
//!     cargo run --example consumer_loop
//! ```

use std::sync::Arc;
use std::time::Duration;

use leasehold::cache::metrics;
use leasehold::prelude::*;
use leasehold::telemetry::{LogFormat, init_logging};
use tracing::info;

const TOPIC: &str = "orders";
const PARTITIONS_PER_BROKER: i32 = 3;

async fn worker(cache: Arc<PartitionCache>, worker_id: usize, stall: bool) {
    for round in 0..10 {
        let Some(partition) = cache.take_idle_partition() else {
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        };
        info!(worker_id, round, partition = %partition, broker = %partition.broker(), "Consuming");

        if stall && round == 0 {
            // Never returned: the lease runs out and the partition is reclaimed.
            tokio::time::sleep(cache.config().max_checkout_age * 2).await;
            continue;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.release_partition(partition.key(), true);
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LogFormat::from_env())?;

    let mut config = CacheConfig::from_env().map_err(|e| e.to_string())?;
    if std::env::var("LEASEHOLD_MAX_CHECKOUT_AGE_MS").is_err() {
        // Short lease so the stalled worker is reclaimed within the run.
        config.max_checkout_age = Duration::from_millis(300);
        config.sweep_interval = Duration::from_millis(100);
    }
    config.validate().map_err(CacheError::from)?;
    let (cache, mut events) = PartitionCache::new(config);
    let cache = Arc::new(cache);
    cache.set_consumer_info("demo-consumer-1", "demo-group");
    let sweeper = ExpirySweeper::from_config(cache.clone());

    let brokers = [
        NodeRef::new(Node::new(1, "10.0.0.1", 8123)),
        NodeRef::new(Node::new(2, "10.0.0.2", 8123)),
    ];
    for broker in &brokers {
        for id in 0..PARTITIONS_PER_BROKER {
            let partition = Partition::new(broker.clone(), TOPIC, id).shared();
            if cache.is_first_registration(partition.key()) {
                info!(partition = %partition, "First registration");
            }
            cache.add_partition(partition);
        }
    }

    let workers: Vec<_> = (0..3)
        .map(|id| tokio::spawn(worker(cache.clone(), id, id == 0)))
        .collect();

    // Coordinator: revoke broker 2's partitions mid-run.
    let coordinator = {
        let cache = cache.clone();
        let revoked = brokers[1].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let subscribe_infos: Vec<_> = cache
                .subscribe_infos()
                .into_iter()
                .filter(|s| s.partition().broker() == &revoked)
                .collect();
            cache
                .offer_event_and_notify(ConsumerEvent::new(
                    1,
                    EventType::Disconnect,
                    subscribe_infos,
                ))
                .await
        })
    };

    if let Some(event) = events.recv().await {
        info!(rebalance_id = event.rebalance_id, event_type = ?event.event_type, "Rebalance");
        let mut removed = BrokerPartitions::new();
        cache.remove_and_get_partitions(&event.subscribe_infos, false, &mut removed);
        for (broker, partitions) in &removed {
            let consumed = partitions.iter().filter(|p| p.last_consumed()).count();
            info!(broker = %broker, removed = partitions.len(), consumed, "Released partitions");
        }
    }
    coordinator.await??;

    for w in workers {
        w.await?;
    }
    sweeper.shutdown().await;

    cache.check_invariants()?;
    info!(
        registered = cache.registered_count(),
        idle = cache.idle_partition_keys().len(),
        used = cache.used_partition_keys().len(),
        "Final state"
    );
    println!("{}", metrics::encode_metrics().map_err(|e| e.to_string())?);
    Ok(())
}
