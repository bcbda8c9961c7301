use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::{Message, SubscriptionKey};
use crate::stream::supervisor::ConnectionState;

/// A message routed to a subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub seq: u64,
    pub key: SubscriptionKey,
    pub message: Message,
    pub received_at: DateTime<Utc>,
}

/// A supervisor state transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub seq: u64,
    pub key: SubscriptionKey,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Message(MessageEvent),
    Status(StatusEvent),
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: BusEvent) {
        // No receivers is normal before the presentation layer attaches.
        let _ = self.tx.send(event);
    }

    pub fn emit_message(&self, key: SubscriptionKey, message: Message) -> MessageEvent {
        let event = MessageEvent {
            seq: self.next_seq(),
            key,
            message,
            received_at: Utc::now(),
        };
        self.publish(BusEvent::Message(event.clone()));
        event
    }

    pub fn emit_status(&self, key: SubscriptionKey, state: ConnectionState) {
        let event = StatusEvent {
            seq: self.next_seq(),
            key,
            state,
        };
        self.publish(BusEvent::Status(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            timestamp: 1,
            event_kind: EventKind::Message,
            topic: "alerts".to_string(),
            body: None,
            title: None,
            tags: None,
            priority: None,
            origin_server: "https://ntfy.sh".to_string(),
        }
    }

    #[tokio::test]
    async fn sequence_numbers_increase_across_event_types() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let key = SubscriptionKey::new("ntfy.sh", "alerts").unwrap();

        bus.emit_status(key.clone(), ConnectionState::Connecting);
        bus.emit_message(key, message("m1"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, BusEvent::Status(StatusEvent { seq: 0, .. })));
        assert!(matches!(second, BusEvent::Message(MessageEvent { seq: 1, .. })));
    }

    #[test]
    fn publish_without_receivers_is_silent() {
        let bus = EventBus::new(4);
        let key = SubscriptionKey::new("ntfy.sh", "alerts").unwrap();
        let event = bus.emit_message(key, message("m1"));
        assert_eq!(event.seq, 0);
    }
}
