//! Configuration for the partition cache.
//!
//! ```rust,no_run
//! use leasehold::cache::CacheConfig;
//!
//! let config = CacheConfig::from_env().expect("invalid cache configuration");
//! config.validate().expect("inconsistent cache configuration");
//! ```

use std::time::Duration;

use crate::constants::{
    DEFAULT_CHECKOUT_TIMERS_ENABLED, DEFAULT_MAX_CHECKOUT_AGE_MS, DEFAULT_SWEEP_INTERVAL_MS,
};

/// Tunables for checkout expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// A checkout older than this is reclaimed by the sweep, and its
    /// partition is flagged as not last-consumed.
    pub max_checkout_age: Duration,

    /// How often [`ExpirySweeper`](super::ExpirySweeper) runs the sweep.
    pub sweep_interval: Duration,

    /// Arm a per-checkout timer of `max_checkout_age` so an overrun lease is
    /// reclaimed without waiting for the next sweep. Requires a tokio runtime
    /// at checkout time; without one the sweep alone handles expiry.
    pub checkout_timers_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_checkout_age: Duration::from_millis(DEFAULT_MAX_CHECKOUT_AGE_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            checkout_timers_enabled: DEFAULT_CHECKOUT_TIMERS_ENABLED,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_checkout_age.is_zero() {
            errors.push("max_checkout_age must be greater than zero".to_string());
        }

        if self.sweep_interval.is_zero() {
            errors.push("sweep_interval must be greater than zero".to_string());
        }

        // A sweep slower than the lease lets overruns go unnoticed for more than one lease.
        if self.sweep_interval > self.max_checkout_age {
            errors.push(format!(
                "sweep_interval ({:?}) must not exceed max_checkout_age ({:?})",
                self.sweep_interval, self.max_checkout_age
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `LEASEHOLD_MAX_CHECKOUT_AGE_MS`: checkout lease in milliseconds (default: 60000)
    /// - `LEASEHOLD_SWEEP_INTERVAL_MS`: sweep interval in milliseconds (default: 1000)
    /// - `LEASEHOLD_CHECKOUT_TIMERS`: `true`/`false` (default: true)
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let max_checkout_age = match std::env::var("LEASEHOLD_MAX_CHECKOUT_AGE_MS") {
            Ok(v) => Duration::from_millis(
                v.parse()
                    .map_err(|e| format!("Invalid LEASEHOLD_MAX_CHECKOUT_AGE_MS: {}", e))?,
            ),
            Err(_) => defaults.max_checkout_age,
        };

        let sweep_interval = match std::env::var("LEASEHOLD_SWEEP_INTERVAL_MS") {
            Ok(v) => Duration::from_millis(
                v.parse()
                    .map_err(|e| format!("Invalid LEASEHOLD_SWEEP_INTERVAL_MS: {}", e))?,
            ),
            Err(_) => defaults.sweep_interval,
        };

        let checkout_timers_enabled = std::env::var("LEASEHOLD_CHECKOUT_TIMERS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.checkout_timers_enabled);

        Ok(Self {
            max_checkout_age,
            sweep_interval,
            checkout_timers_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_checkout_age, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert!(config.checkout_timers_enabled);
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = CacheConfig {
            max_checkout_age: Duration::ZERO,
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_sweep_slower_than_lease_rejected() {
        let config = CacheConfig {
            max_checkout_age: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(500),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("sweep_interval"));
    }
}
