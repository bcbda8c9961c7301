//! ntfy desk backend library.
//!
//! Keeps any number of live topic subscriptions on one or more ntfy
//! servers, each on its own supervised SSE connection, and routes
//! deduplicated messages to the presentation layer.
//!
//! # Architecture
//!
//! - `core`: subscription keys and the message model
//! - `stream`: SSE parsing, transport, backoff and the per-subscription supervisor
//! - `bus`: dedup, fan-out, unread counters and the broadcast event bus
//! - `registry`: the authoritative subscription set
//! - `runtime`: the `StreamManager` facade and startup recovery
//! - `db`: SQLite snapshot persistence
//! - `commands`: Tauri plugin and IPC handlers (feature `desktop`)

pub mod bus;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod registry;
pub mod runtime;
pub mod stream;

use std::sync::Arc;

use serde::Serialize;

use db::{Database, SnapshotStore};
use registry::RegistryError;
use stream::TransportError;

pub use runtime::StreamManager;

pub const DEFAULT_LOG_FILTER: &str = "ntfy_desk=debug,info";

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Subscription(#[from] RegistryError),
    #[error("publish failed: {0}")]
    Publish(TransportError),
    #[error("{0}")]
    Db(#[from] db::DbError),
    #[error("{0}")]
    Other(String),
}

impl Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Bootstrap helpers
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber. `RUST_LOG` wins over the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open the on-disk snapshot store in the data directory.
pub fn open_store() -> Result<Arc<dyn SnapshotStore>, AppError> {
    let path = config::database_path().map_err(AppError::Other)?;
    tracing::debug!(path = %path.display(), "opening database");
    Ok(Arc::new(Database::open(&path)?))
}
