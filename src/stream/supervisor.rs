//! Connection supervisor: one resilient stream per subscription.
//!
//! The supervisor runs as its own task and walks an explicit state machine:
//!
//! ```text
//! Idle ──► Connecting ──(first well-formed frame)──► Streaming
//!              ▲    │                                    │
//!              │    └──(error, non-2xx, EOF, silence)──┐ │
//!              │                                       ▼ ▼
//!              └─────────(delay elapsed)───────── Backoff(n, at)
//!
//! any state ──(close / handle dropped)──► Closed
//! ```
//!
//! Failures never escape the task: it reconnects until cancelled. On each
//! reconnect it asks the server to replay from the last message it handed
//! to the dispatcher; anything replayed twice is filtered by the
//! dispatcher's dedup window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::parser::{parse_frame, Decoded, FrameStream};
use super::transport::{ByteStream, StreamTransport, TransportError};
use crate::bus::{Delivery, Dispatcher, Route};
use crate::config::StreamConfig;
use crate::core::{Message, SubscriptionKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    #[serde(rename_all = "camelCase")]
    Backoff {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Closed,
}

impl ConnectionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Position to resume from after a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayCursor {
    last_message_id: Option<String>,
    last_seen_time: Option<i64>,
}

impl ReplayCursor {
    pub fn record(&mut self, message: &Message) {
        if message.is_message() {
            self.last_message_id = Some(message.id.clone());
        }
        if message.timestamp > 0 {
            let latest = self.last_seen_time.map_or(message.timestamp, |t| t.max(message.timestamp));
            self.last_seen_time = Some(latest);
        }
    }

    /// Value for the `since` query parameter.
    ///
    /// The last message id when one is known, otherwise the newest frame
    /// timestamp, otherwise nothing.
    pub fn since(&self) -> Option<String> {
        self.last_message_id
            .clone()
            .or_else(|| self.last_seen_time.map(|time| time.to_string()))
    }
}

#[derive(Debug)]
pub enum SupervisorCommand {
    Close,
}

/// Handle to a running supervisor task.
///
/// Dropping the handle also stops the task.
pub struct Supervisor {
    key: SubscriptionKey,
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Spawn the supervisor task for `route` on the current runtime.
    pub fn spawn(
        route: Route,
        transport: Arc<dyn StreamTransport>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<StreamConfig>,
    ) -> Self {
        let key = route.key().clone();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            backoff: config.backoff_policy(),
            route,
            transport,
            dispatcher,
            config,
            cmd_rx,
            state_tx,
            state: ConnectionState::Idle,
            cursor: ReplayCursor::default(),
            retry_count: 0,
        };
        let task = tokio::spawn(driver.run());

        Self {
            key,
            cmd_tx,
            state_rx,
            task,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Cancel the task and wait up to `grace` for it to release its
    /// connection, aborting it otherwise. Returns `true` on a clean stop.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self {
            key,
            cmd_tx,
            mut task,
            ..
        } = self;

        let _ = cmd_tx.try_send(SupervisorCommand::Close);
        drop(cmd_tx);

        match timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(key = %key, "supervisor did not stop within {grace:?}, aborting");
                task.abort();
                false
            }
        }
    }
}

enum Exit {
    Cancelled,
    Failed(TransportError),
}

struct Driver {
    route: Route,
    transport: Arc<dyn StreamTransport>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<StreamConfig>,
    backoff: Backoff,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    cursor: ReplayCursor,
    retry_count: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let since = self.cursor.since();
            let url = self.route.key().stream_url(since.as_deref());
            let connect_timeout = self.config.connect_timeout;
            info!(key = %self.route.key(), since = ?since, attempt = self.retry_count, "connecting");

            let opened = tokio::select! {
                biased;

                _ = self.cmd_rx.recv() => break,
                result = timeout(connect_timeout, self.transport.open_stream(&url)) => {
                    result.unwrap_or(Err(TransportError::Timeout(connect_timeout)))
                }
            };

            let failure = match opened {
                Ok(body) => match self.stream(body).await {
                    Exit::Cancelled => break,
                    Exit::Failed(err) => err,
                },
                Err(err) => err,
            };

            let delay = self.backoff.delay(self.retry_count);
            let next_attempt_at = attempt_time(Utc::now(), delay);
            if failure.is_retryable() {
                warn!(
                    key = %self.route.key(),
                    error = %failure,
                    retry = self.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "stream failed, backing off"
                );
            } else {
                error!(
                    key = %self.route.key(),
                    error = %failure,
                    retry = self.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "stream rejected by server, backing off"
                );
            }
            self.set_state(ConnectionState::Backoff {
                retry_count: self.retry_count,
                next_attempt_at,
            });
            self.retry_count = self.retry_count.saturating_add(1);

            tokio::select! {
                biased;

                _ = self.cmd_rx.recv() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        info!(key = %self.route.key(), "supervisor closed");
    }

    /// Read one connection until it fails or the supervisor is cancelled.
    /// The body (and with it the socket) is dropped on return.
    async fn stream(&mut self, body: ByteStream) -> Exit {
        let mut frames = FrameStream::new(body);
        let inactivity = self.config.inactivity_timeout;

        loop {
            let next = tokio::select! {
                biased;

                _ = self.cmd_rx.recv() => return Exit::Cancelled,
                next = timeout(inactivity, frames.next()) => next,
            };

            let decoded = match next {
                Err(_) => return Exit::Failed(TransportError::Inactivity(inactivity)),
                Ok(None) => return Exit::Failed(TransportError::StreamEnded),
                Ok(Some(Err(err))) => return Exit::Failed(err),
                Ok(Some(Ok(decoded))) => decoded,
            };

            let frame = match decoded {
                Decoded::Comment => {
                    trace!(key = %self.route.key(), "comment");
                    continue;
                }
                Decoded::Frame(frame) => frame,
            };

            let message = match parse_frame(&frame, self.route.key()) {
                Ok(message) => message,
                Err(err) => {
                    warn!(key = %self.route.key(), error = %err, "dropping malformed frame");
                    continue;
                }
            };

            if !self.state.is_streaming() {
                info!(key = %self.route.key(), "stream established");
                self.retry_count = 0;
                self.set_state(ConnectionState::Streaming);
            }

            self.cursor.record(&message);
            if self.dispatcher.dispatch(&self.route, message) == Delivery::Stale {
                debug!(key = %self.route.key(), "route retired, stopping");
                return Exit::Cancelled;
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.dispatcher.report_status(&self.route, state);
    }
}

/// `now + delay`, saturating at the latest representable instant.
fn attempt_time(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
