//! Background driver for the expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::duration_millis;
use super::data_cache::PartitionCache;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Add +/- 15% jitter to a sweep interval so many consumers started together
/// do not sweep in lockstep.
///
/// A 1 second interval becomes anywhere from 850ms to 1150ms.
fn with_jitter(base: Duration) -> Duration {
    let jitter_factor = 0.85 + fastrand::f64() * 0.30;
    Duration::from_secs_f64(base.as_secs_f64() * jitter_factor)
}

/// Runs [`PartitionCache::sweep_expired`] periodically until shut down or
/// dropped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Start sweeping `cache` every `interval` (jittered), reclaiming
    /// checkouts older than `max_age`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(cache: Arc<PartitionCache>, interval: Duration, max_age: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        info!(
            interval_ms = duration_millis(interval),
            max_age_ms = duration_millis(max_age),
            "Starting expiry sweeper"
        );

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(with_jitter(interval)) => {},
                    _ = shutdown_rx.recv() => {
                        info!("Expiry sweeper received shutdown signal");
                        break;
                    }
                }
                let reclaimed = cache.sweep_expired(max_age);
                if reclaimed > 0 {
                    debug!(reclaimed, "Expiry sweep reclaimed partitions");
                }
            }
        });

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Start sweeping with the cache's configured interval and lease.
    pub fn from_config(cache: Arc<PartitionCache>) -> Self {
        let interval = cache.config().sweep_interval;
        let max_age = cache.config().max_checkout_age;
        Self::spawn(cache, interval, max_age)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the sweep loop to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        let Some(handle) = self.handle.take() else {
            return;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => debug!("Expiry sweeper stopped"),
            Ok(Err(e)) if e.is_cancelled() => debug!("Expiry sweeper was cancelled"),
            Ok(Err(e)) => warn!(error = %e, "Expiry sweeper panicked"),
            Err(_) => {
                warn!("Expiry sweeper did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::CacheConfig;
    use crate::types::{Node, NodeRef, Partition};

    #[test]
    fn test_with_jitter_bounds() {
        let base = Duration::from_millis(1_000);
        for _ in 0..100 {
            let jittered = with_jitter(base);
            assert!(jittered >= Duration::from_millis(850));
            assert!(jittered <= Duration::from_millis(1_150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_checkout() {
        let clock = ManualClock::new(0);
        let config = CacheConfig {
            checkout_timers_enabled: false,
            ..Default::default()
        };
        let (cache, _rx) = PartitionCache::with_clock(config, Arc::new(clock.clone()));
        let cache = Arc::new(cache);
        let broker = NodeRef::new(Node::new(1, "h", 1));
        let p = Partition::new(broker, "t", 0).shared();
        cache.add_partition(p.clone());
        cache.take_idle_partition().unwrap();

        let sweeper = ExpirySweeper::spawn(
            cache.clone(),
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert!(sweeper.is_running());

        clock.advance(Duration::from_millis(501));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.is_idle(p.key()));

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (cache, _rx) = PartitionCache::new(CacheConfig::default());
        let sweeper = ExpirySweeper::from_config(Arc::new(cache));
        assert!(sweeper.is_running());
        sweeper.shutdown().await;
    }
}
