//! HTTP transport capability: open a streaming GET, issue a POST.
//!
//! The supervisor and the facade only talk to [`StreamTransport`], so tests
//! can script connections without a network. [`HttpTransport`] is the
//! reqwest-backed implementation used by the application.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info};

/// Chunked response body of a streaming request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("HTTP error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("read error: {0}")]
    Read(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("no activity for {0:?}")]
    Inactivity(Duration),
    #[error("stream ended by server")]
    StreamEnded,
    #[error("client error: {0}")]
    Client(String),
}

impl TransportError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Client(_) => false,
            TransportError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => true,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Connect(format!("timed out: {value}"));
        }
        if value.is_builder() {
            return Self::Client(value.to_string());
        }
        if value.is_body() || value.is_decode() {
            return Self::Read(value.to_string());
        }
        Self::Connect(value.to_string())
    }
}

/// Body and passthrough headers for a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    pub body: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<i32>,
}

impl PublishRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open a long-lived GET and return its body as a chunk stream.
    ///
    /// Resolves once response headers arrive; a non-2xx status is an error.
    /// Dropping the returned stream releases the connection.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// Issue a single POST. Any non-2xx status is an error.
    async fn publish(&self, url: &str, request: &PublishRequest) -> Result<(), TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        // No overall request timeout: streams are meant to stay open and the
        // supervisor enforces its own inactivity limit.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("ntfy-desk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = error_for_status(response).await?;
        info!(url, "stream response received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())));
        Ok(Box::pin(body))
    }

    async fn publish(&self, url: &str, request: &PublishRequest) -> Result<(), TransportError> {
        let mut builder = self.client.post(url).body(request.body.clone());
        if let Some(title) = &request.title {
            builder = builder.header("X-Title", title);
        }
        if !request.tags.is_empty() {
            builder = builder.header("X-Tags", request.tags.join(","));
        }
        if let Some(priority) = request.priority {
            builder = builder.header("X-Priority", priority.to_string());
        }

        let response = builder.send().await?;
        error_for_status(response).await?;
        debug!(url, "publish accepted");
        Ok(())
    }
}
