use crate::error::DomainError;
use crate::models::{AppState, Notification};

/// A user's notifications, newest first.
pub fn notifications_for<'a>(state: &'a AppState, user_id: &str) -> Vec<&'a Notification> {
    let mut inbox: Vec<_> = state
        .notifications
        .iter()
        .filter(|n| n.user_id == user_id)
        .collect();
    inbox.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    inbox
}

pub fn unread_count(state: &AppState, user_id: &str) -> usize {
    state
        .notifications
        .iter()
        .filter(|n| n.user_id == user_id && !n.read)
        .count()
}

pub fn mark_read(mut state: AppState, notification_id: &str) -> Result<AppState, DomainError> {
    let notification = state
        .notifications
        .iter_mut()
        .find(|n| n.id == notification_id)
        .ok_or_else(|| DomainError::not_found("notification", notification_id))?;
    notification.read = true;
    Ok(state)
}

pub fn mark_all_read(mut state: AppState, user_id: &str) -> AppState {
    for notification in state.notifications.iter_mut().filter(|n| n.user_id == user_id) {
        notification.read = true;
    }
    state
}

/// Deletes every notification addressed to `user_id`.
pub fn clear_all(mut state: AppState, user_id: &str) -> AppState {
    state.notifications.retain(|n| n.user_id != user_id);
    state
}
