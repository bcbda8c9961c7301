//! Deduplication, fan-out and unread bookkeeping for delivered messages.
//!
//! Every registered subscription gets a channel holding its dedup window,
//! unread counter and per-key listeners. Supervisors deliver through a
//! [`Route`] obtained at registration; once the subscription is removed (or
//! replaced by a newer registration of the same key) the route goes stale
//! and anything still in flight on it is dropped.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::dedup::DedupWindow;
use super::event_bus::EventBus;
use crate::core::{Message, SubscriptionKey};
use crate::stream::supervisor::ConnectionState;

/// Delivery capability handed to a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    key: SubscriptionKey,
    epoch: u64,
}

impl Route {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Duplicate,
    /// The route no longer belongs to a registered subscription.
    Stale,
}

struct ListenerSlot {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

struct Channel {
    epoch: u64,
    dedup: DedupWindow,
    unread: u64,
    listeners: Vec<ListenerSlot>,
}

/// Receives the messages of a single subscription, in arrival order.
pub struct Listener {
    id: Uuid,
    key: SubscriptionKey,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Listener {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Next message, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Listener {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

pub struct Dispatcher {
    channels: DashMap<SubscriptionKey, Channel>,
    // Lock order: `active` before any `channels` entry.
    active: RwLock<Option<SubscriptionKey>>,
    bus: Arc<EventBus>,
    dedup_capacity: usize,
    next_epoch: AtomicU64,
}

impl Dispatcher {
    pub fn new(bus: Arc<EventBus>, dedup_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            active: RwLock::new(None),
            bus,
            dedup_capacity,
            next_epoch: AtomicU64::new(1),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Open a fresh channel for `key`, invalidating any previous route.
    pub fn register(&self, key: &SubscriptionKey) -> Route {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let channel = Channel {
            epoch,
            dedup: DedupWindow::new(self.dedup_capacity),
            unread: 0,
            listeners: Vec::new(),
        };
        self.channels.insert(key.clone(), channel);
        Route {
            key: key.clone(),
            epoch,
        }
    }

    /// Close the route's channel. Listeners observe end-of-stream.
    pub fn deregister(&self, route: &Route) -> bool {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let removed = self
            .channels
            .remove_if(&route.key, |_, channel| channel.epoch == route.epoch)
            .is_some();
        if removed && active.as_ref() == Some(&route.key) {
            *active = None;
        }
        removed
    }

    /// Deduplicate, fan out and count one message.
    pub fn dispatch(&self, route: &Route, message: Message) -> Delivery {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let Some(mut channel) = self.channels.get_mut(&route.key) else {
            debug!(key = %route.key, id = %message.id, "dropping message for removed subscription");
            return Delivery::Stale;
        };
        if channel.epoch != route.epoch {
            debug!(key = %route.key, id = %message.id, "dropping message from superseded connection");
            return Delivery::Stale;
        }

        if !channel.dedup.insert(&message.id) {
            debug!(key = %route.key, id = %message.id, "suppressed duplicate message");
            return Delivery::Duplicate;
        }

        if message.is_message() && active.as_ref() != Some(&route.key) {
            channel.unread += 1;
        }

        channel
            .listeners
            .retain(|slot| slot.tx.send(message.clone()).is_ok());

        trace!(key = %route.key, id = %message.id, kind = %message.event_kind, "message delivered");
        self.bus.emit_message(route.key.clone(), message);
        Delivery::Delivered
    }

    /// Publish a supervisor state change unless the route is stale.
    pub fn report_status(&self, route: &Route, state: ConnectionState) {
        let current = self
            .channels
            .get(&route.key)
            .is_some_and(|channel| channel.epoch == route.epoch);
        if current {
            self.bus.emit_status(route.key.clone(), state);
        }
    }

    /// Attach a listener to a registered subscription.
    pub fn listen(&self, key: &SubscriptionKey) -> Option<Listener> {
        let mut channel = self.channels.get_mut(key)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        channel.listeners.push(ListenerSlot { id, tx });
        Some(Listener {
            id,
            key: key.clone(),
            rx,
        })
    }

    /// Detach a listener before dropping it.
    pub fn unlisten(&self, key: &SubscriptionKey, listener_id: Uuid) -> bool {
        let Some(mut channel) = self.channels.get_mut(key) else {
            return false;
        };
        let before = channel.listeners.len();
        channel.listeners.retain(|slot| slot.id != listener_id);
        channel.listeners.len() != before
    }

    /// Make `key` the active topic and zero its counter; `None` clears it.
    pub fn select(&self, key: Option<&SubscriptionKey>) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = key.cloned();
        if let Some(key) = key {
            if let Some(mut channel) = self.channels.get_mut(key) {
                channel.unread = 0;
            }
        }
    }

    pub fn active(&self) -> Option<SubscriptionKey> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unread(&self, key: &SubscriptionKey) -> Option<u64> {
        self.channels.get(key).map(|channel| channel.unread)
    }
}
