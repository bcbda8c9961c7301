//! Scripted `StreamTransport` for driving supervisors without a network.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use ntfy_desk_lib::stream::{ByteStream, PublishRequest, StreamTransport, TransportError};

type Chunk = Result<Bytes, TransportError>;

enum Scripted {
    Refuse(TransportError),
    Accept(ScriptedBody),
    Hang(ReleaseOnDrop),
}

/// Flags its owner as released when dropped.
struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Test side of an accepted connection.
pub struct MockConnection {
    tx: Option<mpsc::UnboundedSender<Chunk>>,
    released: Arc<AtomicBool>,
}

impl MockConnection {
    /// Push raw bytes to the client. Returns `false` once the client is gone.
    pub fn send(&self, text: &str) -> bool {
        self.send_bytes(text.as_bytes())
    }

    pub fn send_bytes(&self, chunk: &[u8]) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(Bytes::copy_from_slice(chunk))).is_ok())
    }

    /// Fail the next read.
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(error));
        }
    }

    /// End the response body (EOF).
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Whether the client dropped the response body.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub async fn wait_released(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.is_released() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.is_released()
    }
}

struct ScriptedBody {
    rx: mpsc::UnboundedReceiver<Chunk>,
    released: Arc<AtomicBool>,
}

impl Stream for ScriptedBody {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ScriptedBody {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct State {
    script: VecDeque<Scripted>,
    stream_urls: Vec<String>,
    publishes: Vec<(String, PublishRequest)>,
    publish_error: Option<TransportError>,
}

/// Connections are handed out in the order they were scripted. Once the
/// script runs out, further connections stay open and silent.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connection(&self) -> MockConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicBool::new(false));
        self.lock().script.push_back(Scripted::Accept(ScriptedBody {
            rx,
            released: Arc::clone(&released),
        }));
        MockConnection {
            tx: Some(tx),
            released,
        }
    }

    /// A connect that never completes. The returned handle reports when
    /// the client gives up on it.
    pub fn push_hanging_connect(&self) -> MockConnection {
        let released = Arc::new(AtomicBool::new(false));
        self.lock()
            .script
            .push_back(Scripted::Hang(ReleaseOnDrop(Arc::clone(&released))));
        MockConnection { tx: None, released }
    }

    pub fn push_refusal(&self, error: TransportError) {
        self.lock().script.push_back(Scripted::Refuse(error));
    }

    pub fn fail_publishes(&self, error: TransportError) {
        self.lock().publish_error = Some(error);
    }

    /// URLs of every stream opened so far, in order.
    pub fn stream_urls(&self) -> Vec<String> {
        self.lock().stream_urls.clone()
    }

    pub fn publishes(&self) -> Vec<(String, PublishRequest)> {
        self.lock().publishes.clone()
    }

    /// Wait until at least `count` streams were requested.
    pub async fn wait_for_connections(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.stream_urls().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.stream_urls().len() >= count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        let next = {
            let mut state = self.lock();
            state.stream_urls.push(url.to_string());
            state.script.pop_front()
        };
        match next {
            Some(Scripted::Refuse(error)) => Err(error),
            Some(Scripted::Accept(body)) => Ok(Box::pin(body)),
            Some(Scripted::Hang(guard)) => {
                let _guard = guard;
                futures::future::pending().await
            }
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }

    async fn publish(&self, url: &str, request: &PublishRequest) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.publishes.push((url.to_string(), request.clone()));
        match &state.publish_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
