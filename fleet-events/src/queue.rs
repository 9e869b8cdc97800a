//! A bounded, drop-oldest-on-overflow queue for a single subscriber.
//!
//! `tokio::sync::mpsc`'s bounded channel drops the newest item on overflow
//! (the sender just blocks or fails); subscribers here need the opposite —
//! a slow listener should lose stale events, not ones it hasn't seen yet.
//! So this is a small ring buffer guarded by a mutex and a `Notify`,
//! generalizing `neuron-hooks`'s ordered-dispatch loop from one pipeline
//! shared by all hooks to one independent queue per subscriber.

use fleet_core::Event;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

pub(crate) struct SubscriberQueue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push an event, dropping the oldest queued one if full. Returns
    /// whether an event was dropped.
    pub(crate) fn push(&self, event: Event) -> bool {
        let mut dropped = false;
        {
            let mut q = self.inner.lock().expect("subscriber queue mutex poisoned");
            if q.len() >= self.capacity {
                q.pop_front();
                dropped = true;
            }
            q.push_back(event);
        }
        self.notify.notify_one();
        dropped
    }

    /// Wait for and return the next queued event.
    pub(crate) async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.inner.lock().expect("subscriber queue mutex poisoned").pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::EventType;

    #[test]
    fn push_within_capacity_does_not_drop() {
        let q = SubscriberQueue::new(2);
        assert!(!q.push(Event::new("alpha", EventType::CreatureBoot)));
        assert!(!q.push(Event::new("alpha", EventType::CreatureSleep)));
    }

    #[test]
    fn push_past_capacity_drops_oldest() {
        let q = SubscriberQueue::new(1);
        assert!(!q.push(Event::new("alpha", EventType::CreatureBoot)));
        assert!(q.push(Event::new("alpha", EventType::CreatureSleep)));
    }

    #[tokio::test]
    async fn recv_returns_events_in_order() {
        let q = SubscriberQueue::new(4);
        q.push(Event::new("alpha", EventType::CreatureBoot));
        q.push(Event::new("alpha", EventType::CreatureWake));
        let first = q.recv().await;
        let second = q.recv().await;
        assert_eq!(first.event_type, EventType::CreatureBoot);
        assert_eq!(second.event_type, EventType::CreatureWake);
    }
}
