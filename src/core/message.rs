//! Messages delivered by a topic stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of event carried by a stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Open,
    Keepalive,
    PollRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Open => "open",
            EventKind::Keepalive => "keepalive",
            EventKind::PollRequest => "poll_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "message" => Ok(EventKind::Message),
            "open" => Ok(EventKind::Open),
            "keepalive" => Ok(EventKind::Keepalive),
            "poll_request" => Ok(EventKind::PollRequest),
            other => Err(other.to_string()),
        }
    }
}

/// A single event received from a server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "time")]
    pub timestamp: i64,
    #[serde(rename = "event")]
    pub event_kind: EventKind,
    pub topic: String,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(rename = "serverUrl")]
    pub origin_server: String,
}

impl Message {
    pub fn is_message(&self) -> bool {
        self.event_kind == EventKind::Message
    }
}

/// JSON object carried in a frame's `data:` line.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireMessage {
    pub id: Option<String>,
    pub time: i64,
    pub event: Option<String>,
    pub topic: Option<String>,
    pub message: Option<String>,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in [
            EventKind::Message,
            EventKind::Open,
            EventKind::Keepalive,
            EventKind::PollRequest,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert_eq!("message_delete".parse::<EventKind>(), Err("message_delete".to_string()));
    }

    #[test]
    fn serializes_in_wire_shape() {
        let message = Message {
            id: "m1".to_string(),
            timestamp: 1000,
            event_kind: EventKind::Message,
            topic: "alerts".to_string(),
            body: Some("hi".to_string()),
            title: None,
            tags: Some(vec!["warning".to_string()]),
            priority: None,
            origin_server: "https://ntfy.sh".to_string(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "m1",
                "time": 1000,
                "event": "message",
                "topic": "alerts",
                "message": "hi",
                "tags": ["warning"],
                "serverUrl": "https://ntfy.sh",
            })
        );
    }
}
