//! Tauri plugin exposing the subscription core to the desktop frontend.
//!
//! The host app registers it with
//! `.plugin(ntfy_desk_lib::commands::plugin(manager))`; the frontend calls
//! `invoke("plugin:ntfy|subscribe", { serverUrl, topic })` and listens for
//! `new-message` and `connection-status`.

pub mod messages;
pub mod subscriptions;

use std::sync::Arc;

use tauri::plugin::{Builder, TauriPlugin};
use tauri::{Manager, RunEvent, Runtime};

use crate::bus::emitter::FrontendEmitter;
use crate::StreamManager;

pub struct NtfyState {
    pub manager: Arc<StreamManager>,
}

pub fn plugin<R: Runtime>(manager: Arc<StreamManager>) -> TauriPlugin<R> {
    Builder::new("ntfy")
        .invoke_handler(tauri::generate_handler![
            // subscriptions
            subscriptions::subscribe,
            subscriptions::unsubscribe,
            subscriptions::list_subscriptions,
            // messages
            messages::publish,
            messages::select_topic,
            messages::unread_counts,
        ])
        .setup(move |app, _api| {
            FrontendEmitter::start(manager.events(), app.clone());

            // Restore before the commands can reach the manager. Supervisors
            // are spawned onto the async runtime.
            tauri::async_runtime::block_on(async { manager.restore() });

            app.manage(NtfyState { manager });
            tracing::info!("ntfy plugin started");
            Ok(())
        })
        .on_event(|app, event| {
            if let RunEvent::Exit = event {
                let manager = Arc::clone(&app.state::<NtfyState>().manager);
                tauri::async_runtime::block_on(async move { manager.shutdown().await });
            }
        })
        .build()
}
