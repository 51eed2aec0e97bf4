//! services/api/src/web/notifications.rs
//!
//! Notification inbox endpoints. Every route is scoped to the caller's own notifications.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use getitdone_core::{Notification, NotificationId, NotificationKind, NotificationQuery, UserId, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::web::messages::UnreadCount;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    /// Notification type, e.g. `new_application`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkedRead {
    pub updated: usize,
}

async fn owned_notification(
    state: &AppState,
    notification_id: NotificationId,
    user_id: UserId,
) -> Result<Notification, ApiError> {
    let notification = state.market.notifications.get(notification_id).await?;
    if notification.user_id != user_id {
        return Err(WorkflowError::Forbidden(
            "You can only manage your own notifications".to_string(),
        )
        .into());
    }
    Ok(notification)
}

/// GET /notifications - The caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    params(InboxQuery),
    responses(
        (status = 200, description = "Notifications"),
        (status = 400, description = "Unknown notification type")
    ),
    security(("bearer" = []))
)]
pub async fn list_notifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let kind = query
        .kind
        .as_deref()
        .map(|k| k.parse::<NotificationKind>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let filter = NotificationQuery {
        unread_only: query.unread_only,
        kind,
    };
    Ok(Json(state.market.notifications.query(user_id, &filter).await))
}

/// GET /notifications/unread-count
#[utoipa::path(
    get,
    path = "/notifications/unread-count",
    responses((status = 200, description = "Unread notification count", body = UnreadCount)),
    security(("bearer" = []))
)]
pub async fn unread_notifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Json<UnreadCount> {
    Json(UnreadCount {
        unread_count: state.market.notifications.unread_count(user_id).await,
    })
}

/// PUT /notifications/{id}/read
#[utoipa::path(
    put,
    path = "/notifications/{id}/read",
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "The notification, now read"),
        (status = 403, description = "Someone else's notification"),
        (status = 404, description = "No such notification")
    ),
    security(("bearer" = []))
)]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(notification_id): Path<NotificationId>,
) -> Result<Json<Notification>, ApiError> {
    owned_notification(&state, notification_id, user_id).await?;
    Ok(Json(
        state.market.notifications.mark_read(notification_id).await?,
    ))
}

/// PUT /notifications/read-all
#[utoipa::path(
    put,
    path = "/notifications/read-all",
    responses((status = 200, description = "How many notifications changed", body = MarkedRead)),
    security(("bearer" = []))
)]
pub async fn mark_all_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<MarkedRead>, ApiError> {
    let updated = state.market.notifications.mark_all_read(user_id).await?;
    Ok(Json(MarkedRead { updated }))
}

/// DELETE /notifications/{id}
#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 403, description = "Someone else's notification"),
        (status = 404, description = "No such notification")
    ),
    security(("bearer" = []))
)]
pub async fn delete_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(notification_id): Path<NotificationId>,
) -> Result<StatusCode, ApiError> {
    owned_notification(&state, notification_id, user_id).await?;
    state.market.notifications.delete(notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
