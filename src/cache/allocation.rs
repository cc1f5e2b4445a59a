//! Allocation pool: idle partitions waiting for a consumer, and checked-out
//! ("used") partitions with their checkout time.
//!
//! # Invariants
//!
//! - The idle sequence holds no duplicates; its order is hand-out order
//!   (first in, first out by registration or return time).
//! - A key is never idle and used at the same time.
//!
//! The pool does not know which keys are registered; the cache combines it
//! with the [`PartitionRegistry`](super::registry::PartitionRegistry) under one
//! lock and only requeues keys the registry still holds.

use std::collections::{HashMap, VecDeque};

use super::expiry_timer::ExpiryTimer;
use crate::types::PartitionKey;

/// A live checkout.
#[derive(Debug)]
pub struct Checkout {
    /// Epoch milliseconds when the partition was handed out.
    pub since_millis: u64,
    /// Unique per checkout; lets a late timer recognize it is stale.
    pub token: u64,
    timer: Option<ExpiryTimer>,
}

#[derive(Debug, Default)]
pub struct AllocationPool {
    idle: VecDeque<PartitionKey>,
    used: HashMap<PartitionKey, Checkout>,
    next_token: u64,
}

impl AllocationPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key at the tail of the idle sequence unless it is already idle.
    pub fn push_idle(&mut self, key: PartitionKey) -> bool {
        if self.idle.contains(&key) {
            return false;
        }
        self.idle.push_back(key);
        true
    }

    /// Next key to hand out.
    pub fn pop_idle(&mut self) -> Option<PartitionKey> {
        self.idle.pop_front()
    }

    /// Remove the first occurrence of `key` from the idle sequence.
    ///
    /// Linear scan. A key that is not idle leaves the sequence untouched.
    pub fn remove_from_index(&mut self, key: &str) -> bool {
        match self.idle.iter().position(|k| &**k == key) {
            Some(pos) => {
                self.idle.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Record a checkout of `key` at `now_millis`, taking it out of the idle
    /// sequence. Replaces (and cancels) any previous checkout of the key.
    /// Returns the new checkout token.
    pub fn check_out(&mut self, key: PartitionKey, now_millis: u64) -> u64 {
        self.remove_from_index(&key);
        self.next_token += 1;
        let token = self.next_token;
        if let Some(previous) = self.used.insert(
            key,
            Checkout {
                since_millis: now_millis,
                token,
                timer: None,
            },
        ) {
            if let Some(timer) = previous.timer {
                timer.cancel();
            }
        }
        token
    }

    /// Attach an expiry timer to the checkout with `token`. A timer for a
    /// checkout that no longer exists is dropped (and thereby aborted).
    pub fn attach_timer(&mut self, key: &str, token: u64, timer: ExpiryTimer) {
        match self.used.get_mut(key) {
            Some(checkout) if checkout.token == token => {
                if let Some(previous) = checkout.timer.replace(timer) {
                    previous.cancel();
                }
            }
            _ => drop(timer),
        }
    }

    /// End the checkout of `key` (if any), cancel its timer and take the key
    /// out of the idle sequence. Returns the ended checkout.
    pub fn release(&mut self, key: &str) -> Option<Checkout> {
        let checkout = self.used.remove(key).map(|mut checkout| {
            if let Some(timer) = checkout.timer.take() {
                timer.cancel();
            }
            checkout
        });
        self.remove_from_index(key);
        checkout
    }

    /// Keys whose checkout is strictly older than `max_age_millis`.
    pub fn expired(&self, now_millis: u64, max_age_millis: u64) -> Vec<PartitionKey> {
        self.used
            .iter()
            .filter(|(_, c)| now_millis.saturating_sub(c.since_millis) > max_age_millis)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn checkout_token(&self, key: &str) -> Option<u64> {
        self.used.get(key).map(|c| c.token)
    }

    pub fn checkout_time(&self, key: &str) -> Option<u64> {
        self.used.get(key).map(|c| c.since_millis)
    }

    pub fn is_used(&self, key: &str) -> bool {
        self.used.contains_key(key)
    }

    pub fn is_idle(&self, key: &str) -> bool {
        self.idle.iter().any(|k| &**k == key)
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn used_len(&self) -> usize {
        self.used.len()
    }

    pub fn idle_keys(&self) -> Vec<PartitionKey> {
        self.idle.iter().cloned().collect()
    }

    pub fn used_keys(&self) -> Vec<PartitionKey> {
        self.used.keys().cloned().collect()
    }

    /// Verify idle/used exclusivity and the no-duplicate rule.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (i, key) in self.idle.iter().enumerate() {
            if self.used.contains_key(key) {
                return Err(format!("partition {} is both idle and used", key));
            }
            if self.idle.iter().skip(i + 1).any(|k| k == key) {
                return Err(format!("partition {} is idle more than once", key));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(s: &str) -> PartitionKey {
        Arc::from(s)
    }

    #[test]
    fn test_idle_is_fifo_without_duplicates() {
        let mut pool = AllocationPool::new();
        assert!(pool.push_idle(key("a")));
        assert!(pool.push_idle(key("b")));
        assert!(!pool.push_idle(key("a")));
        assert_eq!(pool.idle_len(), 2);
        assert_eq!(pool.pop_idle().as_deref(), Some("a"));
        assert_eq!(pool.pop_idle().as_deref(), Some("b"));
        assert_eq!(pool.pop_idle(), None);
    }

    #[test]
    fn test_remove_from_index_missing_key_is_noop() {
        let mut pool = AllocationPool::new();
        pool.push_idle(key("a"));
        pool.push_idle(key("b"));
        assert!(!pool.remove_from_index("zzz"));
        assert_eq!(pool.idle_keys(), vec![key("a"), key("b")]);
        assert!(pool.remove_from_index("b"));
        assert_eq!(pool.idle_keys(), vec![key("a")]);
    }

    #[test]
    fn test_remove_from_index_on_empty_pool() {
        let mut pool = AllocationPool::new();
        assert!(!pool.remove_from_index("a"));
    }

    #[test]
    fn test_check_out_moves_key_out_of_idle() {
        let mut pool = AllocationPool::new();
        pool.push_idle(key("a"));
        let token = pool.check_out(key("a"), 1_000);
        assert!(pool.is_used("a"));
        assert!(!pool.is_idle("a"));
        assert_eq!(pool.checkout_token("a"), Some(token));
        assert_eq!(pool.checkout_time("a"), Some(1_000));
        pool.check_consistency().unwrap();
    }

    #[test]
    fn test_tokens_are_unique_per_checkout() {
        let mut pool = AllocationPool::new();
        let first = pool.check_out(key("a"), 0);
        pool.release("a");
        let second = pool.check_out(key("a"), 0);
        assert_ne!(first, second);
    }

    #[test]
    fn test_release_unknown_key() {
        let mut pool = AllocationPool::new();
        assert!(pool.release("a").is_none());
    }

    #[test]
    fn test_expired_is_strictly_greater() {
        let mut pool = AllocationPool::new();
        pool.check_out(key("a"), 1_000);
        assert!(pool.expired(1_100, 100).is_empty());
        assert_eq!(pool.expired(1_101, 100), vec![key("a")]);
    }

    #[test]
    fn test_expired_with_clock_behind_checkout() {
        let mut pool = AllocationPool::new();
        pool.check_out(key("a"), 5_000);
        assert!(pool.expired(1_000, 0).is_empty());
    }
}
