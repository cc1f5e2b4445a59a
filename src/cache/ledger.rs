//! First-registration ledger.
//!
//! Remembers every partition key ever presented so the protocol client can
//! run one-time setup (e.g. the initial subscription handshake) exactly once
//! per partition. Entries never expire and are never removed, including when
//! the partition itself leaves the cache.

use std::sync::Arc;

use dashmap::DashMap;

use super::metrics;
use crate::types::PartitionKey;

#[derive(Debug, Default)]
pub struct RegistrationLedger {
    booked: DashMap<PartitionKey, bool>,
}

impl RegistrationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` on first sight and return the value established then.
    ///
    /// The first call for a key books it as `true`; every later call returns
    /// that same value. Concurrent first calls for one key book it once.
    pub fn is_first_registration(&self, key: &str) -> bool {
        if let Some(booked) = self.booked.get(key) {
            return *booked;
        }
        *self.booked.entry(Arc::from(key)).or_insert_with(|| {
            metrics::record_first_registration();
            true
        })
    }

    /// Whether `key` has been presented before.
    pub fn is_booked(&self, key: &str) -> bool {
        self.booked.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.booked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.booked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_answer_never_flips() {
        let ledger = RegistrationLedger::new();
        assert!(!ledger.is_booked("1:t:0"));
        let first = ledger.is_first_registration("1:t:0");
        assert!(first);
        for _ in 0..5 {
            assert_eq!(ledger.is_first_registration("1:t:0"), first);
        }
        assert!(ledger.is_booked("1:t:0"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_first_registration_books_once() {
        let ledger = Arc::new(RegistrationLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || ledger.is_first_registration("1:t:0"))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(ledger.len(), 1);
    }
}
