//! In-process channelized pub/sub (spec §4.5).
//!
//! Topics are opaque strings. Each subscriber owns a bounded inbox;
//! publish is non-blocking and overflow drops the *oldest* queued message,
//! setting a "lagging" flag the subscriber can observe. A subscriber's
//! failure to consume never blocks other subscribers or the publisher.
//! Grounded in the teacher's bounded-`mpsc`-channel idiom for the
//! deployment queue (`engine/mod.rs`), generalized into a topic registry;
//! the inbox itself is a small ring buffer rather than a raw `mpsc`
//! channel because drop-oldest overflow needs to reach into the queue,
//! which `mpsc::Sender` does not allow from the sending side.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A message delivered to subscribers of a topic.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    /// Monotonic per-topic sequence number (spec §8 invariant 6).
    pub sequence: u64,
    pub payload: Value,
    pub emitted_at: String,
}

struct Inbox {
    queue: parking_lot::Mutex<VecDeque<Event>>,
    notify: Notify,
    lagging: AtomicBool,
    capacity: usize,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            lagging: AtomicBool::new(false),
            capacity,
        }
    }

    fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.lagging.store(true, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes: the bus
/// prunes dead inboxes lazily on the next publish to that topic.
pub struct Subscription {
    pub topic: String,
    inbox: Arc<Inbox>,
}

impl Subscription {
    /// Await the next event, oldest-first.
    pub async fn recv(&mut self) -> Event {
        loop {
            if let Some(event) = self.inbox.queue.lock().pop_front() {
                return event;
            }
            self.inbox.notify.notified().await;
        }
    }

    /// Whether a message was dropped due to overflow since this flag was
    /// last cleared.
    pub fn take_lagging(&self) -> bool {
        self.inbox.lagging.swap(false, Ordering::Relaxed)
    }
}

struct TopicState {
    inboxes: parking_lot::Mutex<Vec<Arc<Inbox>>>,
    sequence: AtomicU64,
}

impl TopicState {
    fn new() -> Self {
        Self {
            inboxes: parking_lot::Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }
}

pub struct EventBus {
    topics: DashMap<String, Arc<TopicState>>,
    inbox_size: usize,
}

impl EventBus {
    pub fn new(inbox_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            inbox_size,
        }
    }

    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let state = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(TopicState::new()))
            .clone();
        let inbox = Arc::new(Inbox::new(self.inbox_size.max(1)));
        state.inboxes.lock().push(inbox.clone());
        Subscription { topic, inbox }
    }

    /// Publish a payload to a topic. A no-op if nobody has ever subscribed.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Serialize) {
        let topic = topic.into();
        let Some(state) = self.topics.get(&topic) else {
            return;
        };
        let sequence = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, topic = %topic, "failed to serialize event payload");
                return;
            }
        };
        let event = Event {
            topic: topic.clone(),
            sequence,
            payload,
            emitted_at: Utc::now().to_rfc3339(),
        };

        let mut inboxes = state.inboxes.lock();
        inboxes.retain(|inbox| {
            if Arc::strong_count(inbox) == 1 {
                // Only the registry holds a reference: the Subscription
                // handle was dropped, prune it.
                return false;
            }
            inbox.push(event.clone());
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_subscribe_is_a_noop() {
        let bus = EventBus::new(4);
        bus.publish("deployment:1", serde_json::json!({"status": "queued"}));
        let mut sub = bus.subscribe("deployment:1");
        bus.publish("deployment:1", serde_json::json!({"status": "cloning"}));
        let event = sub.recv().await;
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn sequence_numbers_are_ordered_per_topic() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("deployment:1");
        for i in 0..5 {
            bus.publish("deployment:1", serde_json::json!({ "i": i }));
        }
        for expected in 1..=5u64 {
            let event = sub.recv().await;
            assert_eq!(event.sequence, expected);
        }
    }

    #[tokio::test]
    async fn a_lagging_subscriber_does_not_block_others() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe("topic");
        let mut fast = bus.subscribe("topic");
        for i in 0..10 {
            bus.publish("topic", serde_json::json!({ "i": i }));
            // Drain `fast` as we go so it never overflows, unlike `slow`.
            let event = fast.recv().await;
            assert_eq!(event.sequence, i + 1);
        }
        assert!(slow.take_lagging());
        assert!(!fast.take_lagging());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let bus = EventBus::new(4);
        {
            let _sub = bus.subscribe("topic");
        }
        bus.publish("topic", serde_json::json!({}));
        let state = bus.topics.get("topic").unwrap();
        assert!(state.inboxes.lock().is_empty());
    }
}
