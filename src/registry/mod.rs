//! The authoritative set of subscriptions.
//!
//! Each entry owns exactly one [`Supervisor`]. Mutations run under a single
//! mutex that is only held for the in-memory update and the snapshot write;
//! supervisor shutdown (which may wait on the network) happens after the
//! lock is released.
//!
//! The stored snapshot is read once, before the first mutation or on an
//! explicit [`SubscriptionRegistry::restore`], whichever comes first. A
//! subscribe that races startup therefore extends the stored set instead
//! of replacing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{Dispatcher, Route};
use crate::config::StreamConfig;
use crate::core::{KeyError, SubscriptionKey};
use crate::db::SnapshotStore;
use crate::runtime::recovery;
use crate::stream::{ConnectionState, StreamTransport, Supervisor};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("not subscribed to {0}")]
    UnknownSubscription(String),
}

/// Persisted form of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "serverUrl")]
    pub server_url: String,
    pub topic: String,
}

impl From<&SubscriptionKey> for SubscriptionRecord {
    fn from(key: &SubscriptionKey) -> Self {
        Self {
            server_url: key.origin().to_string(),
            topic: key.topic().to_string(),
        }
    }
}

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(flatten)]
    pub key: SubscriptionKey,
    pub status: ConnectionState,
    pub created_at: DateTime<Utc>,
}

struct Entry {
    key: SubscriptionKey,
    route: Route,
    supervisor: Supervisor,
    created_at: DateTime<Utc>,
}

impl Entry {
    fn view(&self) -> Subscription {
        Subscription {
            key: self.key.clone(),
            status: self.supervisor.state(),
            created_at: self.created_at,
        }
    }
}

pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Entry>>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn StreamTransport>,
    config: Arc<StreamConfig>,
    store: Arc<dyn SnapshotStore>,
    /// Set under the `entries` lock once the stored snapshot has been read.
    snapshot_loaded: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn StreamTransport>,
        config: Arc<StreamConfig>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            dispatcher,
            transport,
            config,
            store,
            snapshot_loaded: AtomicBool::new(false),
        }
    }

    /// Subscribe to `topic` on `server`, or return the existing subscription.
    ///
    /// Must be called from within a Tokio runtime: a new entry spawns its
    /// supervisor task immediately.
    pub fn subscribe(&self, server: &str, topic: &str) -> Result<Subscription, RegistryError> {
        let key = SubscriptionKey::new(server, topic)?;
        let mut entries = self.lock();
        let restored = !self.load_snapshot(&mut entries).is_empty();

        if let Some(existing) = entries.iter().find(|entry| entry.key == key) {
            debug!(key = %key, "already subscribed");
            let view = existing.view();
            if restored {
                self.persist(&entries);
            }
            return Ok(view);
        }

        let subscription = self.insert(&mut entries, key);
        self.persist(&entries);
        Ok(subscription)
    }

    /// Cancel the subscription's supervisor and remove it.
    ///
    /// Deliveries for `key` stop before this returns, even if the
    /// connection takes longer to wind down.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<(), RegistryError> {
        let entry = {
            let mut entries = self.lock();
            let restored = !self.load_snapshot(&mut entries).is_empty();
            let Some(position) = entries.iter().position(|entry| &entry.key == key) else {
                if restored {
                    self.persist(&entries);
                }
                return Err(RegistryError::UnknownSubscription(key.to_string()));
            };
            let entry = entries.remove(position);
            self.dispatcher.deregister(&entry.route);
            self.persist(&entries);
            entry
        };

        info!(server = %key.origin(), topic = %key.topic(), "unsubscribed");
        entry.supervisor.shutdown(self.config.shutdown_grace).await;
        Ok(())
    }

    /// Subscriptions in insertion order.
    pub fn list(&self) -> Vec<Subscription> {
        self.lock().iter().map(Entry::view).collect()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.lock()
            .iter()
            .find(|entry| &entry.key == key)
            .map(Entry::view)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.lock().iter().map(|entry| entry.key.clone()).collect()
    }

    pub fn watch_state(&self, key: &SubscriptionKey) -> Option<watch::Receiver<ConnectionState>> {
        self.lock()
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.supervisor.watch_state())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Seed the registry from the stored snapshot, in stored order.
    ///
    /// Returns the subscriptions the snapshot added. Once the snapshot has
    /// been read (here or by an earlier subscribe / unsubscribe) this is a
    /// no-op returning nothing.
    pub fn restore(&self) -> Vec<Subscription> {
        let mut entries = self.lock();
        let restored = self.load_snapshot(&mut entries);
        if !restored.is_empty() {
            self.persist(&entries);
        }
        restored
    }

    /// Close every supervisor without touching the stored snapshot.
    pub async fn shutdown(&self) {
        let drained: Vec<Entry> = std::mem::take(&mut *self.lock());
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "shutting down subscriptions");

        let grace = self.config.shutdown_grace;
        let mut routes = Vec::with_capacity(drained.len());
        let mut closing = Vec::with_capacity(drained.len());
        for entry in drained {
            routes.push(entry.route);
            closing.push(entry.supervisor.shutdown(grace));
        }
        futures::future::join_all(closing).await;

        for route in &routes {
            self.dispatcher.deregister(route);
        }
    }

    /// Read the stored snapshot into `entries` unless that already happened.
    fn load_snapshot(&self, entries: &mut Vec<Entry>) -> Vec<Subscription> {
        if self.snapshot_loaded.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let mut restored = Vec::new();
        for key in recovery::stored_keys(self.store.as_ref()) {
            if entries.iter().any(|entry| entry.key == key) {
                continue;
            }
            restored.push(self.insert(entries, key));
        }
        if !restored.is_empty() {
            info!(count = restored.len(), "restored subscriptions");
        }
        restored
    }

    fn insert(&self, entries: &mut Vec<Entry>, key: SubscriptionKey) -> Subscription {
        let route = self.dispatcher.register(&key);
        let supervisor = Supervisor::spawn(
            route.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.config),
        );
        info!(server = %key.origin(), topic = %key.topic(), "subscribed");

        let entry = Entry {
            key,
            route,
            supervisor,
            created_at: Utc::now(),
        };
        let view = entry.view();
        entries.push(entry);
        view
    }

    fn persist(&self, entries: &[Entry]) {
        let records: Vec<SubscriptionRecord> = entries
            .iter()
            .map(|entry| SubscriptionRecord::from(&entry.key))
            .collect();
        if let Err(e) = self.store.save(&records) {
            warn!(error = %e, "failed to persist subscriptions");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
