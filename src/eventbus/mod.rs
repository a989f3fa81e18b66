//! Event bus: in-process publish/subscribe with bounded queues.
//!
//! Publish is synchronous and non-blocking. Each subscriber owns a bounded
//! queue; when it is full the oldest event for that subscriber is dropped
//! and a drop counter is incremented — the publisher never blocks.
//! Delivery is at-most-once per subscriber, in publish order; there is no
//! cross-subscriber ordering guarantee.
//!
//! Subscriber sets are disjoint and explicitly typed per event class
//! rather than one generic "dashboard" catch-all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::ClockReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventClass {
    Transaction,
    SystemMetric,
    FraudSignal,
    UserAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub class: EventClass,
    pub timestamp: ClockReading,
    pub payload: Value,
}

struct Subscriber {
    class: EventClass,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

pub struct Subscription {
    pub receiver: Receiver<Event>,
    pub dropped: Arc<AtomicU64>,
}

/// Bounded publish/subscribe bus. One dispatcher task per subscriber is
/// expected to drain `Subscription::receiver` continuously; the bus
/// itself does no background work.
pub struct EventBus {
    subscribers: parking_lot::Mutex<Vec<Subscriber>>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self { subscribers: parking_lot::Mutex::new(Vec::new()), queue_capacity }
    }

    /// Registers a new subscriber bound to exactly one event class.
    pub fn subscribe(&self, class: EventClass) -> Subscription {
        let (tx, rx) = bounded(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers.lock().push(Subscriber { class, sender: tx, receiver: rx.clone(), dropped: dropped.clone() });
        Subscription { receiver: rx, dropped }
    }

    /// Publishes to every subscriber bound to `event.class`. Never blocks:
    /// a full subscriber queue drops its own oldest entry to make room.
    pub fn publish(&self, event: Event) {
        let subscribers = self.subscribers.lock();
        for sub in subscribers.iter().filter(|s| s.class == event.class) {
            let mut to_send = event.clone();
            loop {
                match sub.sender.try_send(to_send) {
                    Ok(()) => break,
                    Err(TrySendError::Full(rejected)) => {
                        // Drop the oldest queued event for this subscriber, then retry.
                        if sub.receiver.try_recv().is_ok() {
                            sub.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        to_send = rejected;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading() -> ClockReading {
        ClockReading { wall: Utc::now(), monotonic_nanos: 0 }
    }

    #[test]
    fn delivers_only_to_matching_class() {
        let bus = EventBus::new(4);
        let txn_sub = bus.subscribe(EventClass::Transaction);
        let metric_sub = bus.subscribe(EventClass::SystemMetric);

        bus.publish(Event { class: EventClass::Transaction, timestamp: reading(), payload: Value::Null });

        assert!(txn_sub.receiver.try_recv().is_ok());
        assert!(metric_sub.receiver.try_recv().is_err());
    }

    #[test]
    fn drops_oldest_when_queue_full() {
        let bus = EventBus::new(1);
        let sub = bus.subscribe(EventClass::UserAction);
        bus.publish(Event { class: EventClass::UserAction, timestamp: reading(), payload: Value::from(1) });
        bus.publish(Event { class: EventClass::UserAction, timestamp: reading(), payload: Value::from(2) });
        assert_eq!(sub.dropped.load(Ordering::Relaxed), 1);
        let received = sub.receiver.try_recv().unwrap();
        assert_eq!(received.payload, Value::from(2));
    }
}
