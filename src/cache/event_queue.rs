//! Rebalance event queue and delivery channel.
//!
//! Pending events live in one `Mutex<VecDeque>`: every access to the sequence
//! (offer, poll, clear, and the pop performed by a notify) goes through that
//! lock, so plain offers may interleave freely with notifies.
//!
//! Delivery uses a tokio mpsc channel of capacity
//! [`EVENT_CHANNEL_CAPACITY`](crate::constants::EVENT_CHANNEL_CAPACITY) (one).
//! A notify appends its event, pops the *head* of the sequence and sends that
//! head; it waits while the previously delivered event has not been received.
//! When the sequence already held events, the delivered event is the oldest
//! one, not the one just offered.
//!
//! The append and the pop happen before the notifier waits for the slot, so
//! an event offered while a notify waits stays pending behind the notifier's
//! own event. Notifiers are serialized by a separate delivery lock held from
//! the pop to the send, so events leave the channel in the order they were
//! popped. The async and blocking notifies behave identically.
//!
//! ```text
//!   offer_event ──────────────┐
//!                             ▼
//!   notify ─► [delivery lock] ─► pending.push_back(e); head = pending.pop_front()
//!                             └─► channel (cap 1) ─► EventReceiver
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use super::metrics;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{CacheError, Result};
use crate::types::ConsumerEvent;

#[derive(Debug)]
pub struct EventQueue {
    pending: Mutex<VecDeque<ConsumerEvent>>,
    delivery_lock: tokio::sync::Mutex<()>,
    tx: mpsc::Sender<ConsumerEvent>,
}

/// Consuming half of the delivery channel.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ConsumerEvent>,
}

impl EventQueue {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let queue = Self {
            pending: Mutex::new(VecDeque::new()),
            delivery_lock: tokio::sync::Mutex::new(()),
            tx,
        };
        (queue, EventReceiver { rx })
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<ConsumerEvent>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event without notifying the consumer.
    pub fn offer(&self, event: ConsumerEvent) {
        let mut pending = self.lock_pending();
        pending.push_back(event);
        metrics::record_event_offered("queued");
        metrics::set_pending_events(pending.len());
    }

    /// Pop the oldest pending event.
    pub fn poll(&self) -> Option<ConsumerEvent> {
        let mut pending = self.lock_pending();
        let event = pending.pop_front();
        metrics::set_pending_events(pending.len());
        event
    }

    /// Drop every pending event. An event already sent on the delivery
    /// channel is not affected.
    pub fn clear(&self) {
        let mut pending = self.lock_pending();
        pending.clear();
        metrics::set_pending_events(0);
    }

    pub fn len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_pending().is_empty()
    }

    /// Append `event`, then pop and return the head of the sequence.
    fn rotate(&self, event: ConsumerEvent) -> ConsumerEvent {
        let mut pending = self.lock_pending();
        let head = match pending.pop_front() {
            Some(head) => {
                pending.push_back(event);
                head
            }
            None => event,
        };
        metrics::set_pending_events(pending.len());
        head
    }

    /// Offer `event` and deliver the head of the queue to the consumer,
    /// waiting while the delivery slot is occupied.
    ///
    /// The event is appended and the head popped before waiting, so offers
    /// made while this call waits queue up behind `event`.
    ///
    /// Not cancel safe: dropping the future while it waits for the slot loses
    /// the popped head.
    pub async fn offer_and_notify(&self, event: ConsumerEvent) -> Result<()> {
        metrics::record_event_offered("notify");
        let _delivery = self.delivery_lock.lock().await;
        if self.tx.is_closed() {
            return Err(CacheError::EventChannelClosed);
        }
        let head = self.rotate(event);
        debug!(
            rebalance_id = head.rebalance_id,
            event_type = ?head.event_type,
            "Delivering rebalance event"
        );
        self.tx
            .send(head)
            .await
            .map_err(|_| CacheError::EventChannelClosed)?;
        metrics::record_event_delivered();
        Ok(())
    }

    /// Blocking flavour of [`offer_and_notify`](Self::offer_and_notify) for
    /// plain threads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_offer_and_notify(&self, event: ConsumerEvent) -> Result<()> {
        metrics::record_event_offered("notify");
        let _delivery = self.delivery_lock.blocking_lock();
        if self.tx.is_closed() {
            return Err(CacheError::EventChannelClosed);
        }
        let head = self.rotate(event);
        debug!(
            rebalance_id = head.rebalance_id,
            event_type = ?head.event_type,
            "Delivering rebalance event"
        );
        self.tx
            .blocking_send(head)
            .map_err(|_| CacheError::EventChannelClosed)?;
        metrics::record_event_delivered();
        Ok(())
    }
}

impl EventReceiver {
    /// Wait for the next delivered event. `None` once the queue is dropped.
    pub async fn recv(&mut self) -> Option<ConsumerEvent> {
        self.rx.recv().await
    }

    /// Blocking receive for plain threads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<ConsumerEvent> {
        self.rx.blocking_recv()
    }

    /// Take the delivered event if there is one.
    pub fn try_recv(&mut self) -> Option<ConsumerEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn event(id: i64) -> ConsumerEvent {
        ConsumerEvent::new(id, EventType::Connect, vec![])
    }

    #[test]
    fn test_offer_and_poll_fifo() {
        let (queue, _rx) = EventQueue::new();
        queue.offer(event(1));
        queue.offer(event(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll().map(|e| e.rebalance_id), Some(1));
        assert_eq!(queue.poll().map(|e| e.rebalance_id), Some(2));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_clear() {
        let (queue, _rx) = EventQueue::new();
        queue.offer(event(1));
        queue.offer(event(2));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.poll().is_none());
    }

    #[tokio::test]
    async fn test_notify_on_empty_queue_delivers_offered_event() {
        let (queue, mut rx) = EventQueue::new();
        queue.offer_and_notify(event(7)).await.unwrap();
        assert_eq!(rx.recv().await.map(|e| e.rebalance_id), Some(7));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_notify_delivers_head_not_latest() {
        let (queue, mut rx) = EventQueue::new();
        queue.offer(event(1));
        queue.offer_and_notify(event(2)).await.unwrap();

        assert_eq!(rx.recv().await.map(|e| e.rebalance_id), Some(1));
        assert_eq!(queue.poll().map(|e| e.rebalance_id), Some(2));
    }

    #[tokio::test]
    async fn test_clear_keeps_in_flight_event() {
        let (queue, mut rx) = EventQueue::new();
        queue.offer_and_notify(event(1)).await.unwrap();
        queue.offer(event(2));
        queue.clear();
        assert_eq!(rx.recv().await.map(|e| e.rebalance_id), Some(1));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notify_after_receiver_dropped() {
        let (queue, rx) = EventQueue::new();
        drop(rx);
        let err = queue.offer_and_notify(event(1)).await.unwrap_err();
        assert_eq!(err, CacheError::EventChannelClosed);
        // Nothing was consumed from the sequence.
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_notify_has_already_rotated() {
        let (queue, mut rx) = EventQueue::new();
        let queue = std::sync::Arc::new(queue);
        queue.offer_and_notify(event(1)).await.unwrap();
        queue.offer(event(2));

        let notifier = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer_and_notify(event(3)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Head 2 was popped for delivery; 3 waits in the sequence.
        assert_eq!(queue.len(), 1);
        assert_eq!(rx.recv().await.map(|e| e.rebalance_id), Some(1));
        notifier.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.map(|e| e.rebalance_id), Some(2));
        assert_eq!(queue.poll().map(|e| e.rebalance_id), Some(3));
    }

    #[test]
    fn test_blocking_notify_and_recv() {
        let (queue, mut rx) = EventQueue::new();
        queue.blocking_offer_and_notify(event(3)).unwrap();
        assert_eq!(rx.blocking_recv().map(|e| e.rebalance_id), Some(3));
    }
}
