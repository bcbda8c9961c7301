//! Shared helpers for the streaming integration tests.

pub mod mock_transport;

use std::time::Duration;

use futures::{Stream, StreamExt};
use ntfy_desk_lib::config::StreamConfig;

pub use mock_transport::{MockConnection, MockTransport};

/// Fast reconnects, no jitter.
pub fn test_config() -> StreamConfig {
    StreamConfig::default()
        .backoff(Duration::from_millis(10), Duration::from_millis(40))
        .backoff_jitter(false)
        .shutdown_grace(Duration::from_millis(500))
}

/// A complete SSE frame carrying `data` as its payload.
pub fn sse_frame(data: serde_json::Value) -> String {
    format!("data: {data}\n\n")
}

pub fn message_frame(id: &str, time: i64, body: &str) -> String {
    sse_frame(serde_json::json!({
        "id": id,
        "time": time,
        "event": "message",
        "topic": "alerts",
        "message": body,
    }))
}

pub fn open_frame(id: &str, time: i64) -> String {
    sse_frame(serde_json::json!({
        "id": id,
        "time": time,
        "event": "open",
        "topic": "alerts",
    }))
}

/// Next stream item, or `None` if nothing arrives within `ms` milliseconds.
pub async fn next_within<S>(stream: &mut S, ms: u64) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    tokio::time::timeout(Duration::from_millis(ms), stream.next())
        .await
        .ok()
        .flatten()
}
