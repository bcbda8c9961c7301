//! Frontend event names and the emit policy.
//!
//! Single source of truth for which bus events reach the presentation layer
//! and under which name.

use super::event_bus::BusEvent;

pub const EVENT_NEW_MESSAGE: &str = "new-message";
pub const EVENT_CONNECTION_STATUS: &str = "connection-status";

/// Frontend event name for `event`, or `None` if it is not forwarded.
///
/// Only `message`-kind deliveries become `new-message`; open, keepalive and
/// poll-request frames stay inside the backend.
pub fn frontend_event_name(event: &BusEvent) -> Option<&'static str> {
    match event {
        BusEvent::Message(event) if event.message.is_message() => Some(EVENT_NEW_MESSAGE),
        BusEvent::Message(_) => None,
        BusEvent::Status(_) => Some(EVENT_CONNECTION_STATUS),
    }
}
