//! Command facade over the subscription core.
//!
//! `StreamManager` is what the presentation layer (Tauri commands, the
//! `ntfy_tail` binary) talks to. It wires the registry, dispatcher, event
//! bus and transport together and exposes subscribe / unsubscribe /
//! publish plus the outbound event streams.
//!
//! ```ignore
//! let manager = StreamManager::new(StreamConfig::from_env(), Arc::new(MemoryStore::new()))?;
//! manager.subscribe("ntfy.sh", "alerts")?;
//! let mut messages = manager.messages();
//! while let Some(event) = messages.next().await { /* ... */ }
//! ```

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::bus::{BusEvent, Dispatcher, EventBus, Listener, MessageEvent, StatusEvent};
use crate::config::StreamConfig;
use crate::core::SubscriptionKey;
use crate::db::SnapshotStore;
use crate::registry::{RegistryError, Subscription, SubscriptionRegistry};
use crate::stream::{HttpTransport, PublishRequest, StreamTransport};
use crate::AppError;

pub type MessageStream = BoxStream<'static, MessageEvent>;
pub type StatusStream = BoxStream<'static, StatusEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadCount {
    #[serde(flatten)]
    pub key: SubscriptionKey,
    pub unread: u64,
}

pub struct StreamManager {
    registry: SubscriptionRegistry,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn StreamTransport>,
}

impl StreamManager {
    /// Build a manager backed by the reqwest transport.
    pub fn new(config: StreamConfig, store: Arc<dyn SnapshotStore>) -> Result<Self, AppError> {
        let transport = HttpTransport::new(config.connect_timeout)
            .map_err(|e| AppError::Other(e.to_string()))?;
        Self::with_transport(config, Arc::new(transport), store)
    }

    pub fn with_transport(
        config: StreamConfig,
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::Other)?;
        let bus = Arc::new(EventBus::new(config.event_channel_capacity));
        let dispatcher = Arc::new(Dispatcher::new(bus, config.dedup_capacity));
        let registry = SubscriptionRegistry::new(
            Arc::clone(&dispatcher),
            Arc::clone(&transport),
            Arc::new(config),
            store,
        );
        Ok(Self {
            registry,
            dispatcher,
            transport,
        })
    }

    pub fn subscribe(&self, server: &str, topic: &str) -> Result<Subscription, AppError> {
        Ok(self.registry.subscribe(server, topic)?)
    }

    pub async fn unsubscribe(&self, server: &str, topic: &str) -> Result<(), AppError> {
        let key = SubscriptionKey::new(server, topic).map_err(RegistryError::from)?;
        self.unsubscribe_key(&key).await
    }

    pub async fn unsubscribe_key(&self, key: &SubscriptionKey) -> Result<(), AppError> {
        Ok(self.registry.unsubscribe(key).await?)
    }

    /// Post `body` to the topic once. Failures are returned, never retried.
    pub async fn publish(&self, server: &str, topic: &str, body: &str) -> Result<(), AppError> {
        self.publish_with(server, topic, PublishRequest::new(body)).await
    }

    pub async fn publish_with(
        &self,
        server: &str,
        topic: &str,
        request: PublishRequest,
    ) -> Result<(), AppError> {
        let key = SubscriptionKey::new(server, topic).map_err(RegistryError::from)?;
        self.transport
            .publish(&key.publish_url(), &request)
            .await
            .map_err(|e| {
                warn!(server = %key.origin(), topic = %key.topic(), error = %e, "publish failed");
                AppError::Publish(e)
            })?;
        info!(server = %key.origin(), topic = %key.topic(), "published");
        Ok(())
    }

    /// Every deduplicated delivery, across all subscriptions.
    ///
    /// Consumers that fall behind the bus capacity skip the oldest events.
    pub fn messages(&self) -> MessageStream {
        bus_stream(self.events(), |event| match event {
            BusEvent::Message(message) => Some(message),
            BusEvent::Status(_) => None,
        })
    }

    /// Supervisor state transitions, across all subscriptions.
    pub fn statuses(&self) -> StatusStream {
        bus_stream(self.events(), |event| match event {
            BusEvent::Status(status) => Some(status),
            BusEvent::Message(_) => None,
        })
    }

    pub fn events(&self) -> broadcast::Receiver<BusEvent> {
        self.bus().subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.dispatcher.bus()
    }

    pub fn list(&self) -> Vec<Subscription> {
        self.registry.list()
    }

    /// Messages of one subscription only, or `None` if not subscribed.
    pub fn listen(&self, key: &SubscriptionKey) -> Option<Listener> {
        self.dispatcher.listen(key)
    }

    pub fn select_topic(&self, key: Option<&SubscriptionKey>) {
        self.dispatcher.select(key);
    }

    pub fn active_topic(&self) -> Option<SubscriptionKey> {
        self.dispatcher.active()
    }

    pub fn unread(&self, key: &SubscriptionKey) -> Option<u64> {
        self.dispatcher.unread(key)
    }

    pub fn unread_counts(&self) -> Vec<UnreadCount> {
        self.registry
            .keys()
            .into_iter()
            .filter_map(|key| {
                let unread = self.dispatcher.unread(&key)?;
                Some(UnreadCount { key, unread })
            })
            .collect()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Re-subscribe everything in the stored snapshot.
    ///
    /// Only the first call (or first subscribe / unsubscribe) reads the
    /// snapshot; later calls return nothing.
    pub fn restore(&self) -> Vec<Subscription> {
        self.registry.restore()
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

fn bus_stream<T, F>(rx: broadcast::Receiver<BusEvent>, select: F) -> BoxStream<'static, T>
where
    T: Send + 'static,
    F: Fn(BusEvent) -> Option<T> + Send + Sync + 'static,
{
    stream::unfold((rx, select), |(mut rx, select)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(item) = select(event) {
                        return Some((item, (rx, select)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event consumer lagged, skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
