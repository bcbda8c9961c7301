//! Publish and topic-selection commands

use super::NtfyState;
use crate::core::SubscriptionKey;
use crate::registry::RegistryError;
use crate::runtime::UnreadCount;
use crate::stream::PublishRequest;
use crate::AppError;

#[tauri::command]
pub async fn publish(
    state: tauri::State<'_, NtfyState>,
    server_url: String,
    topic: String,
    body: String,
    title: Option<String>,
    tags: Option<Vec<String>>,
    priority: Option<i32>,
) -> Result<(), AppError> {
    let mut request = PublishRequest::new(body);
    if let Some(title) = title.filter(|value| !value.trim().is_empty()) {
        request = request.title(title);
    }
    if let Some(tags) = tags {
        request = request.tags(tags);
    }
    if let Some(priority) = priority {
        request = request.priority(priority);
    }
    state.manager.publish_with(&server_url, &topic, request).await
}

/// Mark a topic as the one on screen; omit both arguments to clear it.
#[tauri::command]
pub fn select_topic(
    state: tauri::State<'_, NtfyState>,
    server_url: Option<String>,
    topic: Option<String>,
) -> Result<(), AppError> {
    match (server_url, topic) {
        (Some(server_url), Some(topic)) => {
            let key = SubscriptionKey::new(&server_url, &topic).map_err(RegistryError::from)?;
            state.manager.select_topic(Some(&key));
        }
        (None, None) => state.manager.select_topic(None),
        _ => {
            return Err(AppError::Other(
                "serverUrl and topic must be given together".to_string(),
            ))
        }
    }
    Ok(())
}

#[tauri::command]
pub fn unread_counts(state: tauri::State<'_, NtfyState>) -> Vec<UnreadCount> {
    state.manager.unread_counts()
}
