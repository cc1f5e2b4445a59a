//! Per-checkout expiry timers.
//!
//! A timer is a tokio task that sleeps for the checkout lease and then runs a
//! callback. Timers are a latency optimization only: the expiry sweep is the
//! authoritative reclamation path, so a timer that never fires (no runtime,
//! task aborted) or fires after the partition was already returned must be
//! harmless. The callback receives the checkout token it was armed for and
//! the cache ignores fires whose token no longer matches the live checkout.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to an armed timer. Dropping it aborts the timer task.
#[derive(Debug)]
pub struct ExpiryTimer {
    handle: JoinHandle<()>,
}

impl ExpiryTimer {
    /// Arm a timer on the current tokio runtime.
    ///
    /// Returns `None` outside a runtime; callers fall back to the sweep.
    pub fn arm<F>(lease: Duration, on_fire: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = Handle::try_current().ok()?;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(lease).await;
            on_fire();
        });
        Some(Self { handle })
    }

    /// Cancel the timer. Returns `true` if it had not run to completion.
    ///
    /// A callback that is already running is not interrupted; it must detect
    /// the stale checkout itself.
    pub fn cancel(self) -> bool {
        let pending = !self.handle.is_finished();
        trace!(pending, "Cancelling checkout expiry timer");
        pending
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
