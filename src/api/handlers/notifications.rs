use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::authenticate,
    error::error_response,
    state::AppState,
    types::{MarkAllReadResponse, MarkReadResponse},
};
use crate::domain::{CommunicationPreferences, NotificationId, PreferencesUpdate};
use crate::notify::NotificationList;

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<NotificationList>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    let list = state
        .notifier
        .list(identity.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(list))
}

/// POST /api/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<NotificationId>,
) -> std::result::Result<Json<MarkReadResponse>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    state
        .notifier
        .mark_read(identity.user_id, notification_id)
        .await
        .map_err(error_response)?;
    Ok(Json(MarkReadResponse {
        success: true,
        notification_id,
    }))
}

/// POST /api/notifications/read-all
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<MarkAllReadResponse>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    let updated = state
        .notifier
        .mark_all_read(identity.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(MarkAllReadResponse {
        success: true,
        updated,
    }))
}

/// GET /api/notifications/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<CommunicationPreferences>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    let prefs = state
        .notifier
        .preferences(identity.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(prefs))
}

/// PUT /api/notifications/preferences
pub async fn update_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<PreferencesUpdate>,
) -> std::result::Result<Json<CommunicationPreferences>, (StatusCode, String)> {
    let identity = authenticate(&state, &headers).await?;
    let prefs = state
        .notifier
        .update_preferences(identity.user_id, update)
        .await
        .map_err(error_response)?;
    Ok(Json(prefs))
}
