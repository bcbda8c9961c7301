//! Message routing from supervisors to the presentation layer.
//!
//! # Architecture
//!
//! Messages flow Supervisor → Dispatcher → EventBus → consumers:
//! - `Dispatcher`: drops duplicates, feeds per-key listeners, keeps unread counters
//! - `EventBus`: broadcast channel carrying messages and connection status
//! - `emitter` (desktop builds): forwards bus events to the Tauri frontend

pub mod dedup;
pub mod dispatcher;
#[cfg(feature = "desktop")]
pub mod emitter;
pub mod event_bus;
pub mod event_types;

pub use dedup::DedupWindow;
pub use dispatcher::{Delivery, Dispatcher, Listener, Route};
pub use event_bus::{BusEvent, EventBus, MessageEvent, StatusEvent};
