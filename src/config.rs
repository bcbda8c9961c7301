//! Streaming configuration and data-directory resolution.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::stream::backoff::Backoff;

pub const ENV_BACKOFF_BASE_MS: &str = "NTFY_DESK_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_CAP_MS: &str = "NTFY_DESK_BACKOFF_CAP_MS";
pub const ENV_INACTIVITY_SECS: &str = "NTFY_DESK_INACTIVITY_SECS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "NTFY_DESK_CONNECT_TIMEOUT_SECS";
pub const ENV_DEDUP_CAPACITY: &str = "NTFY_DESK_DEDUP_CAPACITY";
pub const ENV_DATA_DIR: &str = "NTFY_DESK_DATA_DIR";

/// Largest accepted reconnect delay ceiling.
pub const MAX_BACKOFF_CAP: Duration = Duration::from_secs(600);

/// Settings shared by every connection supervisor.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Delay before the first reconnect attempt.
    pub backoff_base: Duration,
    /// Upper bound of the un-jittered reconnect delay.
    pub backoff_cap: Duration,
    /// Multiply each delay by a random factor in [0.5, 1.5).
    pub backoff_jitter: bool,
    /// A connection with no frame or comment for this long is treated as dead.
    pub inactivity_timeout: Duration,
    /// Bound on establishing a connection and receiving response headers.
    pub connect_timeout: Duration,
    /// Message ids remembered per subscription for duplicate suppression.
    pub dedup_capacity: usize,
    /// Capacity of the broadcast channel feeding the facade's event streams.
    pub event_channel_capacity: usize,
    /// How long an unsubscribe waits for a supervisor to stop before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            backoff_jitter: true,
            inactivity_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(15),
            dedup_capacity: 512,
            event_channel_capacity: 1024,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    #[must_use]
    pub fn backoff_jitter(mut self, jitter: bool) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    #[must_use]
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Defaults overridden by any well-formed `NTFY_DESK_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>(ENV_BACKOFF_BASE_MS) {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value::<u64>(ENV_BACKOFF_CAP_MS) {
            config.backoff_cap = Duration::from_millis(ms);
        }
        if let Some(secs) = env_value::<u64>(ENV_INACTIVITY_SECS) {
            config.inactivity_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>(ENV_CONNECT_TIMEOUT_SECS) {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_value::<usize>(ENV_DEDUP_CAPACITY) {
            config.dedup_capacity = capacity;
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_base.is_zero() {
            return Err("Backoff base delay must be > 0".to_string());
        }
        if self.backoff_cap < self.backoff_base {
            return Err("Backoff cap must be >= backoff base delay".to_string());
        }
        if self.backoff_cap > MAX_BACKOFF_CAP {
            return Err(format!(
                "Backoff cap must be <= {}s",
                MAX_BACKOFF_CAP.as_secs()
            ));
        }
        if self.inactivity_timeout.is_zero() {
            return Err("Inactivity timeout must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.dedup_capacity == 0 {
            return Err("Dedup capacity must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> Backoff {
        let backoff = Backoff::new(self.backoff_base, self.backoff_cap);
        if self.backoff_jitter {
            backoff
        } else {
            backoff.without_jitter()
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = trimmed, "ignoring malformed environment override");
            None
        }
    }
}

/// Directory holding the subscription database.
pub fn data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_DATA_DIR) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(app_data) = std::env::var("APPDATA") {
            return PathBuf::from(app_data).join("NtfyDesk");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".ntfy-desk");
    }

    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".ntfy-desk");
    }

    PathBuf::from(".ntfy-desk")
}

/// Path of the database file, creating its directory if needed.
pub fn database_path() -> Result<PathBuf, String> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("failed to create data directory {}: {e}", dir.display()))?;
    Ok(dir.join("ntfy-desk.db"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backoff_cap, Duration::from_secs(30));
        assert_eq!(config.dedup_capacity, 512);
    }

    #[test]
    fn validation_errors() {
        let zero_base = StreamConfig::default().backoff(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(zero_base.validate().unwrap_err(), "Backoff base delay must be > 0");

        let inverted = StreamConfig::default().backoff(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(inverted.validate().unwrap_err(), "Backoff cap must be >= backoff base delay");

        let huge = Duration::from_secs(10_u64.pow(13));
        let unbounded = StreamConfig::default().backoff(huge, huge);
        assert_eq!(unbounded.validate().unwrap_err(), "Backoff cap must be <= 600s");

        let no_dedup = StreamConfig::default().dedup_capacity(0);
        assert_eq!(no_dedup.validate().unwrap_err(), "Dedup capacity must be > 0");

        let no_inactivity = StreamConfig::default().inactivity_timeout(Duration::ZERO);
        assert_eq!(no_inactivity.validate().unwrap_err(), "Inactivity timeout must be > 0");
    }

    #[test]
    fn env_overrides_apply_and_malformed_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var(ENV_BACKOFF_BASE_MS, "250");
        std::env::set_var(ENV_DEDUP_CAPACITY, "not-a-number");
        std::env::set_var(ENV_INACTIVITY_SECS, " 45 ");

        let config = StreamConfig::from_env();

        std::env::remove_var(ENV_BACKOFF_BASE_MS);
        std::env::remove_var(ENV_DEDUP_CAPACITY);
        std::env::remove_var(ENV_INACTIVITY_SECS);

        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.dedup_capacity, 512);
        assert_eq!(config.inactivity_timeout, Duration::from_secs(45));
    }

    #[test]
    fn data_dir_honours_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var(ENV_DATA_DIR, "/tmp/ntfy-desk-test");
        let dir = data_dir();
        std::env::remove_var(ENV_DATA_DIR);
        assert_eq!(dir, PathBuf::from("/tmp/ntfy-desk-test"));
    }
}
