use super::NtfyState;
use crate::registry::Subscription;
use crate::AppError;

#[tauri::command]
pub async fn subscribe(
    state: tauri::State<'_, NtfyState>,
    server_url: String,
    topic: String,
) -> Result<Subscription, AppError> {
    state.manager.subscribe(&server_url, &topic)
}

#[tauri::command]
pub async fn unsubscribe(
    state: tauri::State<'_, NtfyState>,
    server_url: String,
    topic: String,
) -> Result<(), AppError> {
    state.manager.unsubscribe(&server_url, &topic).await
}

#[tauri::command]
pub fn list_subscriptions(state: tauri::State<'_, NtfyState>) -> Vec<Subscription> {
    state.manager.list()
}
