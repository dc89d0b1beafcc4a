//! Process-wide event fan-out.
//!
//! Every write path publishes through here; every server-push stream reads
//! from here. Per (user, topic) the bus keeps a subscriber set and a FIFO of
//! already-serialised events that accumulated while nobody was listening.
//! The first subscriber to join drains that queue, which doubles as the
//! canonical replay of an in-flight turn.
//!
//! Subscriber writes are non-blocking sends into a bounded channel: a full
//! channel means a client that stopped reading, and the subscriber is
//! removed rather than allowed to stall fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use lumen_common::events::Topic;
use lumen_common::id::UserId;

/// Ceiling per pending FIFO; oldest events are dropped beyond it.
pub const PENDING_CAP: usize = 200;

/// Per-subscriber channel depth. Larger than `PENDING_CAP` so a queue drain
/// always fits into a fresh subscriber.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// A registered server-push client.
pub struct Subscriber {
    id: String,
    sender: mpsc::Sender<String>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking write. `false` means the client is gone or not reading.
    fn write(&self, line: &str) -> bool {
        self.sender.try_send(line.to_string()).is_ok()
    }
}

#[derive(Default)]
struct TopicChannel {
    subscribers: Vec<Subscriber>,
    pending: VecDeque<String>,
}

#[derive(Default)]
pub struct EventBus {
    channels: Mutex<HashMap<(UserId, Topic), TopicChannel>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise `event` once and deliver it to every subscriber of
    /// `(user_id, topic)`, or queue it if there are none. Write failures
    /// remove the failing subscriber and are otherwise swallowed.
    pub fn broadcast<E: Serialize>(&self, user_id: &UserId, topic: Topic, event: &E) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!(user_id = %user_id, topic = %topic, error = %e, "Unserialisable event");
                return;
            }
        };

        let mut channels = self.channels.lock().expect("bus lock");
        let channel = channels.entry((user_id.clone(), topic)).or_default();

        if channel.subscribers.is_empty() {
            if channel.pending.len() >= PENDING_CAP {
                channel.pending.pop_front();
                warn!(user_id = %user_id, topic = %topic, "Pending queue full, dropping oldest");
            }
            channel.pending.push_back(line);
            return;
        }

        channel.subscribers.retain(|sub| {
            let ok = sub.write(&line);
            if !ok {
                debug!(user_id = %user_id, topic = %topic, subscriber = %sub.id, "Removing dead subscriber");
            }
            ok
        });
    }

    /// Register a subscriber. Any pending events are drained into it first,
    /// in order; returns whether a non-empty queue was flushed (the caller
    /// uses this to suppress history replay).
    pub fn subscribe(&self, user_id: &UserId, topic: Topic, subscriber: Subscriber) -> bool {
        let mut channels = self.channels.lock().expect("bus lock");
        let channel = channels.entry((user_id.clone(), topic)).or_default();

        let flushed = !channel.pending.is_empty();
        for line in channel.pending.drain(..) {
            if !subscriber.write(&line) {
                debug!(user_id = %user_id, topic = %topic, subscriber = %subscriber.id, "Subscriber died during queue flush");
                break;
            }
        }
        channel.subscribers.push(subscriber);
        flushed
    }

    /// Remove one subscriber. Safe to call repeatedly.
    pub fn unsubscribe(&self, user_id: &UserId, topic: Topic, subscriber_id: &str) {
        let mut channels = self.channels.lock().expect("bus lock");
        if let Some(channel) = channels.get_mut(&(user_id.clone(), topic)) {
            channel.subscribers.retain(|s| s.id != subscriber_id);
            if channel.subscribers.is_empty() && channel.pending.is_empty() {
                channels.remove(&(user_id.clone(), topic));
            }
        }
    }

    /// Drop queued events for one topic, or for all of a user's topics.
    /// Called on hard session end so a permanent disconnect cannot grow
    /// queues without bound.
    pub fn clear_pending(&self, user_id: &UserId, topic: Option<Topic>) {
        let mut channels = self.channels.lock().expect("bus lock");
        match topic {
            Some(topic) => {
                if let Some(channel) = channels.get_mut(&(user_id.clone(), topic)) {
                    channel.pending.clear();
                }
            }
            None => {
                for ((uid, _), channel) in channels.iter_mut() {
                    if uid == user_id {
                        channel.pending.clear();
                    }
                }
            }
        }
        channels.retain(|_, c| !c.subscribers.is_empty() || !c.pending.is_empty());
    }

    pub fn subscriber_count(&self, user_id: &UserId, topic: Topic) -> usize {
        self.channels
            .lock()
            .expect("bus lock")
            .get(&(user_id.clone(), topic))
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    pub fn pending_count(&self, user_id: &UserId, topic: Topic) -> usize {
        self.channels
            .lock()
            .expect("bus lock")
            .get(&(user_id.clone(), topic))
            .map(|c| c.pending.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid() -> UserId {
        UserId::from("u1")
    }

    fn subscriber(id: &str) -> (Subscriber, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        (Subscriber::new(id, tx), rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (s1, mut rx1) = subscriber("s1");
        let (s2, mut rx2) = subscriber("s2");
        bus.subscribe(&uid(), Topic::Chat, s1);
        bus.subscribe(&uid(), Topic::Chat, s2);

        bus.broadcast(&uid(), Topic::Chat, &json!({"type": "processing"}));

        assert_eq!(rx1.recv().await.unwrap(), r#"{"type":"processing"}"#);
        assert_eq!(rx2.recv().await.unwrap(), r#"{"type":"processing"}"#);
    }

    #[tokio::test]
    async fn events_queue_when_no_subscribers_and_flush_in_order() {
        let bus = EventBus::new();
        bus.broadcast(&uid(), Topic::Chat, &json!({"n": 1}));
        bus.broadcast(&uid(), Topic::Chat, &json!({"n": 2}));
        assert_eq!(bus.pending_count(&uid(), Topic::Chat), 2);

        let (sub, mut rx) = subscriber("late");
        let flushed = bus.subscribe(&uid(), Topic::Chat, sub);
        assert!(flushed);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":1}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":2}"#);
        assert_eq!(bus.pending_count(&uid(), Topic::Chat), 0);
    }

    #[tokio::test]
    async fn subscribe_with_empty_queue_reports_no_flush() {
        let bus = EventBus::new();
        let (sub, _rx) = subscriber("s1");
        assert!(!bus.subscribe(&uid(), Topic::Chat, sub));
    }

    #[tokio::test]
    async fn queue_flushes_only_into_first_subscriber() {
        let bus = EventBus::new();
        bus.broadcast(&uid(), Topic::Chat, &json!({"n": 1}));

        let (s1, mut rx1) = subscriber("s1");
        let (s2, mut rx2) = subscriber("s2");
        assert!(bus.subscribe(&uid(), Topic::Chat, s1));
        assert!(!bus.subscribe(&uid(), Topic::Chat, s2));

        assert_eq!(rx1.recv().await.unwrap(), r#"{"n":1}"#);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscriber_is_removed_on_write_failure() {
        let bus = EventBus::new();
        let (s1, rx1) = subscriber("dead");
        let (s2, mut rx2) = subscriber("alive");
        bus.subscribe(&uid(), Topic::Chat, s1);
        bus.subscribe(&uid(), Topic::Chat, s2);
        drop(rx1);

        bus.broadcast(&uid(), Topic::Chat, &json!({"n": 1}));

        assert_eq!(bus.subscriber_count(&uid(), Topic::Chat), 1);
        assert_eq!(rx2.recv().await.unwrap(), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn pending_queue_drops_oldest_beyond_cap() {
        let bus = EventBus::new();
        for n in 0..(PENDING_CAP + 5) {
            bus.broadcast(&uid(), Topic::Chat, &json!({"n": n}));
        }
        assert_eq!(bus.pending_count(&uid(), Topic::Chat), PENDING_CAP);

        let (sub, mut rx) = subscriber("late");
        bus.subscribe(&uid(), Topic::Chat, sub);
        // Oldest five were dropped.
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":5}"#);
    }

    #[tokio::test]
    async fn clear_pending_scopes_to_user_and_topic() {
        let bus = EventBus::new();
        let other = UserId::from("u2");
        bus.broadcast(&uid(), Topic::Chat, &json!({"n": 1}));
        bus.broadcast(&uid(), Topic::Photo, &json!({"n": 2}));
        bus.broadcast(&other, Topic::Chat, &json!({"n": 3}));

        bus.clear_pending(&uid(), Some(Topic::Chat));
        assert_eq!(bus.pending_count(&uid(), Topic::Chat), 0);
        assert_eq!(bus.pending_count(&uid(), Topic::Photo), 1);

        bus.clear_pending(&uid(), None);
        assert_eq!(bus.pending_count(&uid(), Topic::Photo), 0);
        assert_eq!(bus.pending_count(&other, Topic::Chat), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (sub, _rx) = subscriber("s1");
        bus.subscribe(&uid(), Topic::Chat, sub);

        bus.unsubscribe(&uid(), Topic::Chat, "s1");
        bus.unsubscribe(&uid(), Topic::Chat, "s1");
        assert_eq!(bus.subscriber_count(&uid(), Topic::Chat), 0);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let (chat_sub, mut chat_rx) = subscriber("chat");
        let (photo_sub, mut photo_rx) = subscriber("photo");
        bus.subscribe(&uid(), Topic::Chat, chat_sub);
        bus.subscribe(&uid(), Topic::Photo, photo_sub);

        bus.broadcast(&uid(), Topic::Chat, &json!({"kind": "chat"}));

        assert_eq!(chat_rx.recv().await.unwrap(), r#"{"kind":"chat"}"#);
        assert!(photo_rx.try_recv().is_err());
    }
}
