//! Subscription identity: a normalized server origin plus a topic name.

use std::fmt;

use reqwest::Url;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid server url '{input}': {reason}")]
    InvalidServer { input: String, reason: String },
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("invalid topic '{0}': must not contain '/', '?', '#' or whitespace")]
    InvalidTopic(String),
}

/// Normalize a user-supplied server URL into an absolute origin.
///
/// A bare host gets `https://` prepended. Scheme and host are lower-cased,
/// the default port is dropped and any path, query or fragment is removed,
/// so `normalize_origin("http://x.com/")` yields `http://x.com`. The
/// function is idempotent.
pub fn normalize_origin(input: &str) -> Result<String, KeyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid_server(input, "empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid_server(input, &e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid_server(input, &format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid_server(input, "missing host"));
    }

    Ok(url.origin().ascii_serialization())
}

fn invalid_server(input: &str, reason: &str) -> KeyError {
    KeyError::InvalidServer {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_topic(topic: &str) -> Result<String, KeyError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(KeyError::EmptyTopic);
    }
    if topic
        .chars()
        .any(|c| c == '/' || c == '?' || c == '#' || c.is_whitespace())
    {
        return Err(KeyError::InvalidTopic(topic.to_string()));
    }
    Ok(topic.to_string())
}

/// `(server origin, topic)` pair identifying one subscription.
///
/// Construction always normalizes the origin, so two keys built from
/// `https://ntfy.sh/` and `NTFY.SH` compare equal. Topics are compared
/// case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionKey {
    #[serde(rename = "serverUrl")]
    origin: String,
    topic: String,
}

impl SubscriptionKey {
    pub fn new(server: &str, topic: &str) -> Result<Self, KeyError> {
        Ok(Self {
            origin: normalize_origin(server)?,
            topic: validate_topic(topic)?,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// `GET {origin}/{topic}/sse`, with `since` for server-side replay.
    pub fn stream_url(&self, since: Option<&str>) -> String {
        let mut url = format!("{}/{}/sse", self.origin, urlencoding::encode(&self.topic));
        if let Some(since) = since {
            url.push_str("?since=");
            url.push_str(&urlencoding::encode(since));
        }
        url
    }

    /// `POST {origin}/{topic}`.
    pub fn publish_url(&self) -> String {
        format!("{}/{}", self.origin, urlencoding::encode(&self.topic))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.topic)
    }
}
