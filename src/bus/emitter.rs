use serde::Serialize;
use tauri::{AppHandle, Emitter, Runtime};
use tokio::sync::broadcast;

use super::event_types::{frontend_event_name, EVENT_NEW_MESSAGE};
use super::{BusEvent, MessageEvent};
use crate::core::Message;

/// `new-message` payload: the message plus the server it came from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMessagePayload<'a> {
    server_url: &'a str,
    message: &'a Message,
}

impl<'a> From<&'a MessageEvent> for NewMessagePayload<'a> {
    fn from(event: &'a MessageEvent) -> Self {
        Self {
            server_url: event.key.origin(),
            message: &event.message,
        }
    }
}

pub struct FrontendEmitter;

impl FrontendEmitter {
    /// Spawn a background task forwarding bus events to the Tauri frontend.
    ///
    /// Events are emitted one by one as they arrive so per-topic ordering is
    /// kept; the task ends when the bus is dropped.
    pub fn start<R: Runtime>(
        mut rx: broadcast::Receiver<BusEvent>,
        app_handle: AppHandle<R>,
    ) -> tauri::async_runtime::JoinHandle<()> {
        tauri::async_runtime::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => emit(&app_handle, &event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("frontend emitter lagged, dropped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn emit<R: Runtime>(app_handle: &AppHandle<R>, event: &BusEvent) {
    let Some(name) = frontend_event_name(event) else {
        return;
    };
    let result = match event {
        BusEvent::Message(message) => {
            debug_assert_eq!(name, EVENT_NEW_MESSAGE);
            app_handle.emit(name, NewMessagePayload::from(message))
        }
        BusEvent::Status(status) => app_handle.emit(name, status),
    };
    if let Err(e) = result {
        tracing::warn!(event = name, "failed to emit event to frontend: {e}");
    }
}
