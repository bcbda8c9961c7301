//! Subscription snapshot persistence.
//!
//! The registry hands every post-mutation snapshot to a [`SnapshotStore`].
//! [`Database`] keeps it in SQLite; [`MemoryStore`] keeps it in process.

mod migrations;
pub mod queries;


use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

use crate::registry::SubscriptionRecord;

/// Settings key holding the ordered subscription list.
pub const SUBSCRIPTIONS_KEY: &str = "subscriptions";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored value: {0}")]
    Json(#[from] serde_json::Error),
    #[error("migration failed: {0}")]
    Migration(String),
}

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Vec<SubscriptionRecord>, DbError>;
    fn save(&self, records: &[SubscriptionRecord]) -> Result<(), DbError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file at `path`, enable WAL mode, and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for Database {
    fn load(&self) -> Result<Vec<SubscriptionRecord>, DbError> {
        let Some(raw) = queries::get_setting(self, SUBSCRIPTIONS_KEY)? else {
            return Ok(Vec::new());
        };
        decode_records(&raw)
    }

    fn save(&self, records: &[SubscriptionRecord]) -> Result<(), DbError> {
        let value_json = serde_json::to_string(records)?;
        queries::set_setting(self, SUBSCRIPTIONS_KEY, &value_json)
    }
}

/// Decode a stored snapshot, skipping entries that are not records.
fn decode_records(raw: &str) -> Result<Vec<SubscriptionRecord>, DbError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let records = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "skipping malformed stored subscription");
                None
            }
        })
        .collect();
    Ok(records)
}

/// In-process store for tests and runs without persistence.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SubscriptionRecord>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<SubscriptionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    pub fn records(&self) -> Vec<SubscriptionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of snapshots written so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Vec<SubscriptionRecord>, DbError> {
        Ok(self.records())
    }

    fn save(&self, records: &[SubscriptionRecord]) -> Result<(), DbError> {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
