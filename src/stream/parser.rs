//! Server-sent event parsing.
//!
//! [`FrameDecoder`] turns arbitrary byte chunks into complete frames,
//! buffering partial lines across reads. [`FrameStream`] wraps a transport
//! byte stream into a lazy stream of decoded items; a new one is built for
//! every connection. [`parse_frame`] converts a frame's JSON payload into a
//! [`Message`].

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tracing::trace;

use super::transport::TransportError;
use crate::core::message::WireMessage;
use crate::core::{EventKind, Message, SubscriptionKey};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame has no data payload")]
    MissingData,
    #[error("frame has no message id")]
    MissingId,
    #[error("unknown event kind '{0}'")]
    UnknownEvent(String),
    #[error("malformed json payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fields of one complete SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Option<String>,
    pub retry: Option<u64>,
}

/// Item produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(RawFrame),
    /// A `:` comment line. Servers use these as heartbeats; they carry no
    /// payload but still count as activity on the connection.
    Comment,
}

/// Longest unterminated line a decoder buffers before giving up.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    line_limit: usize,
    pending: RawFrame,
    has_fields: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_limit(line_limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            line_limit,
            pending: RawFrame::default(),
            has_fields: false,
        }
    }

    /// Feed a chunk and append every item it completes to `out`.
    ///
    /// Bytes after the last newline stay buffered until the next call. An
    /// unterminated line longer than the decoder's limit is a read error.
    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<Decoded>) -> Result<(), TransportError> {
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;
            search_from = start;

            if let Some(item) = self.process_line(&line) {
                out.push_back(item);
            }
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.line_limit {
            return Err(TransportError::Read(format!(
                "line exceeds {} bytes without a newline",
                self.line_limit
            )));
        }
        Ok(())
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<Decoded> {
        if line.is_empty() {
            if !self.has_fields {
                return None;
            }
            self.has_fields = false;
            return Some(Decoded::Frame(std::mem::take(&mut self.pending)));
        }

        if line.starts_with(':') {
            return Some(Decoded::Comment);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => self.pending.id = Some(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            "data" => match self.pending.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.pending.retry = Some(ms);
                }
            }
            other => {
                trace!(field = other, "ignoring unknown SSE field");
                return None;
            }
        }
        self.has_fields = true;
        None
    }
}

/// Lazy stream of decoded items over one connection's byte stream.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<Decoded>,
    failure: Option<TransportError>,
    done: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            failure: None,
            done: false,
        }
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    type Item = Result<Decoded, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            if let Some(err) = this.failure.take() {
                return Poll::Ready(Some(Err(err)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => {
                    if let Err(err) = this.decoder.feed(&chunk, &mut this.ready) {
                        this.failure = Some(err);
                        this.done = true;
                    }
                }
                Some(Err(err)) => {
                    this.failure = Some(err);
                    this.done = true;
                }
                None => {
                    if this.decoder.buffered_len() > 0 {
                        trace!(
                            bytes = this.decoder.buffered_len(),
                            "discarding unterminated frame at end of stream"
                        );
                    }
                    this.done = true;
                }
            }
        }
    }
}

/// Build a [`Message`] from a frame received on `key`'s stream.
///
/// The JSON `event` wins over the frame's `event:` field, which in turn
/// defaults to `message`. A frame-level `id:` fills in a missing JSON id and
/// the subscription's topic fills in a missing JSON topic.
pub fn parse_frame(frame: &RawFrame, key: &SubscriptionKey) -> Result<Message, ParseError> {
    let data = frame
        .data
        .as_deref()
        .filter(|data| !data.trim().is_empty())
        .ok_or(ParseError::MissingData)?;
    let wire: WireMessage = serde_json::from_str(data)?;

    let kind = wire
        .event
        .as_deref()
        .or(frame.event.as_deref())
        .unwrap_or(EventKind::Message.as_str());
    let event_kind = kind.parse::<EventKind>().map_err(ParseError::UnknownEvent)?;

    let id = wire
        .id
        .or_else(|| frame.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or(ParseError::MissingId)?;

    Ok(Message {
        id,
        timestamp: wire.time,
        event_kind,
        topic: wire.topic.unwrap_or_else(|| key.topic().to_string()),
        body: wire.message,
        title: wire.title,
        tags: wire.tags,
        priority: wire.priority,
        origin_server: key.origin().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<Decoded> {
        let mut decoder = FrameDecoder::new();
        let mut out = VecDeque::new();
        for chunk in chunks {
            decoder.feed(chunk, &mut out).unwrap();
        }
        out.into_iter().collect()
    }

    fn frame(id: Option<&str>, event: Option<&str>, data: Option<&str>) -> Decoded {
        Decoded::Frame(RawFrame {
            id: id.map(str::to_string),
            event: event.map(str::to_string),
            data: data.map(str::to_string),
            retry: None,
        })
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("https://ntfy.sh", "alerts").unwrap()
    }

    #[test]
    fn decodes_single_frame() {
        let items = decode_all(&[b"id: m1\nevent: message\ndata: {\"a\":1}\n\n"]);
        assert_eq!(items, vec![frame(Some("m1"), Some("message"), Some("{\"a\":1}"))]);
    }

    #[test]
    fn buffers_frames_split_across_reads() {
        let input = b"event: open\ndata: {\"id\":\"x\"}\n\ndata: second\n\n";
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let items = decode_all(&chunks);
        assert_eq!(
            items,
            vec![
                frame(None, Some("open"), Some("{\"id\":\"x\"}")),
                frame(None, None, Some("second")),
            ]
        );
    }

    #[test]
    fn keeps_multibyte_characters_split_across_reads() {
        let input = "data: {\"message\":\"héllo ✓\"}\n\n".as_bytes();
        let (head, tail) = input.split_at(20);
        let items = decode_all(&[head, tail]);
        assert_eq!(items, vec![frame(None, None, Some("{\"message\":\"héllo ✓\"}"))]);
    }

    #[test]
    fn handles_crlf_comments_and_multiline_data() {
        let items = decode_all(&[b": keepalive\r\ndata: line 1\r\ndata: line 2\r\nretry: 3000\r\n\r\n"]);
        assert_eq!(
            items,
            vec![
                Decoded::Comment,
                Decoded::Frame(RawFrame {
                    id: None,
                    event: None,
                    data: Some("line 1\nline 2".to_string()),
                    retry: Some(3000),
                }),
            ]
        );
    }

    #[test]
    fn overlong_unterminated_line_is_a_read_error() {
        let mut decoder = FrameDecoder::with_line_limit(16);
        let mut out = VecDeque::new();

        decoder.feed(b"data: 0123", &mut out).unwrap();
        decoder.feed(b"456789\n\n", &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.buffered_len(), 0);

        decoder.feed(b"data: 01234", &mut out).unwrap();
        let err = decoder.feed(b"56789abc", &mut out).unwrap_err();
        assert!(matches!(err, TransportError::Read(_)));
    }

    #[tokio::test]
    async fn frame_stream_delivers_completed_frames_before_overflow() {
        let chunks: Vec<Result<Bytes, TransportError>> =
            vec![Ok(Bytes::from_static(b"data: {\"id\":\"a\"}\n\ndata: runaway line"))];
        let mut frames = FrameStream {
            inner: futures::stream::iter(chunks),
            decoder: FrameDecoder::with_line_limit(8),
            ready: VecDeque::new(),
            failure: None,
            done: false,
        };

        assert!(matches!(frames.next().await, Some(Ok(Decoded::Frame(_)))));
        assert!(matches!(frames.next().await, Some(Err(TransportError::Read(_)))));
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn blank_lines_without_fields_emit_nothing() {
        assert!(decode_all(&[b"\n\n\nunknown: field\n\n"]).is_empty());
    }

    #[test]
    fn parses_message_frame() {
        let raw = RawFrame {
            data: Some(
                r#"{"id":"m1","time":1000,"event":"message","topic":"alerts","message":"hi","tags":["a"],"priority":4}"#
                    .to_string(),
            ),
            ..Default::default()
        };
        let message = parse_frame(&raw, &key()).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.timestamp, 1000);
        assert_eq!(message.event_kind, EventKind::Message);
        assert_eq!(message.body.as_deref(), Some("hi"));
        assert_eq!(message.tags, Some(vec!["a".to_string()]));
        assert_eq!(message.priority, Some(4));
        assert_eq!(message.origin_server, "https://ntfy.sh");
    }

    #[test]
    fn falls_back_to_frame_fields() {
        let raw = RawFrame {
            id: Some("k1".to_string()),
            event: Some("keepalive".to_string()),
            data: Some(r#"{"time":5}"#.to_string()),
            retry: None,
        };
        let message = parse_frame(&raw, &key()).unwrap();
        assert_eq!(message.id, "k1");
        assert_eq!(message.event_kind, EventKind::Keepalive);
        assert_eq!(message.topic, "alerts");
    }

    #[test]
    fn rejects_bad_frames() {
        let malformed = RawFrame {
            data: Some("{not json".to_string()),
            ..Default::default()
        };
        assert!(matches!(parse_frame(&malformed, &key()), Err(ParseError::Json(_))));

        let empty = RawFrame::default();
        assert!(matches!(parse_frame(&empty, &key()), Err(ParseError::MissingData)));

        let no_id = RawFrame {
            data: Some(r#"{"time":1,"event":"message"}"#.to_string()),
            ..Default::default()
        };
        assert!(matches!(parse_frame(&no_id, &key()), Err(ParseError::MissingId)));

        let unknown = RawFrame {
            data: Some(r#"{"id":"x","time":1,"event":"message_delete"}"#.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            parse_frame(&unknown, &key()),
            Err(ParseError::UnknownEvent(kind)) if kind == "message_delete"
        ));
    }

    #[tokio::test]
    async fn frame_stream_yields_items_then_error() {
        let chunks: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: {\"id\":\"a\",\"time\":1}\n")),
            Ok(Bytes::from_static(b"\n: ping\n")),
            Err(TransportError::Read("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ];
        let mut frames = FrameStream::new(futures::stream::iter(chunks));

        assert!(matches!(frames.next().await, Some(Ok(Decoded::Frame(_)))));
        assert!(matches!(frames.next().await, Some(Ok(Decoded::Comment))));
        assert!(matches!(frames.next().await, Some(Err(TransportError::Read(_)))));
        assert!(frames.next().await.is_none());
    }
}
