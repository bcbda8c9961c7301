use tracing::{debug, warn};

use crate::core::SubscriptionKey;
use crate::db::SnapshotStore;

/// Keys of the stored snapshot, in stored order.
///
/// A store that cannot be read yields nothing; the process keeps running
/// without its previous subscriptions. Records that no longer validate are
/// skipped, as are repeats.
pub fn stored_keys(store: &dyn SnapshotStore) -> Vec<SubscriptionKey> {
    let records = match store.load() {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "could not load stored subscriptions");
            return Vec::new();
        }
    };

    let mut keys: Vec<SubscriptionKey> = Vec::with_capacity(records.len());
    for record in &records {
        match SubscriptionKey::new(&record.server_url, &record.topic) {
            Ok(key) if keys.contains(&key) => {
                debug!(key = %key, "skipping repeated stored subscription");
            }
            Ok(key) => keys.push(key),
            Err(e) => warn!(
                server = %record.server_url,
                topic = %record.topic,
                error = %e,
                "skipping invalid stored subscription"
            ),
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bus::{Dispatcher, EventBus};
    use crate::config::StreamConfig;
    use crate::db::{DbError, MemoryStore};
    use crate::registry::{SubscriptionRecord, SubscriptionRegistry};
    use crate::stream::{ByteStream, PublishRequest, StreamTransport, TransportError};

    fn record(server: &str, topic: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            server_url: server.to_string(),
            topic: topic.to_string(),
        }
    }

    struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        fn load(&self) -> Result<Vec<SubscriptionRecord>, DbError> {
            Err(DbError::Migration("unreadable".to_string()))
        }

        fn save(&self, _records: &[SubscriptionRecord]) -> Result<(), DbError> {
            Err(DbError::Migration("read-only".to_string()))
        }
    }

    #[test]
    fn keeps_stored_order_and_drops_bad_records() {
        let store = MemoryStore::with_records(vec![
            record("https://ntfy.sh", "b"),
            record("ftp://example.com", "nope"),
            record("https://ntfy.sh", "a"),
            record("ntfy.sh/", "b"),
        ]);

        let topics: Vec<String> = stored_keys(&store)
            .iter()
            .map(|key| key.topic().to_string())
            .collect();
        assert_eq!(topics, vec!["b", "a"]);
    }

    struct PendingTransport;

    #[async_trait::async_trait]
    impl StreamTransport for PendingTransport {
        async fn open_stream(&self, _url: &str) -> Result<ByteStream, TransportError> {
            Ok(Box::pin(futures::stream::pending()))
        }

        async fn publish(&self, _url: &str, _request: &PublishRequest) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unreadable_store_restores_nothing() {
        let store: Arc<dyn SnapshotStore> = Arc::new(BrokenStore);
        assert!(stored_keys(store.as_ref()).is_empty());

        let dispatcher = Arc::new(Dispatcher::new(Arc::new(EventBus::new(16)), 16));
        let registry = SubscriptionRegistry::new(
            dispatcher,
            Arc::new(PendingTransport),
            Arc::new(StreamConfig::default()),
            store,
        );
        assert!(registry.restore().is_empty());

        // Save failures are logged, never surfaced.
        assert!(registry.subscribe("https://ntfy.sh", "alerts").is_ok());
        registry.shutdown().await;
    }
}
