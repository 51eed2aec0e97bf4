//! services/api/src/web/messages.rs
//!
//! Messaging endpoints: sending, reading a thread, and conversation summaries.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use getitdone_core::{Conversation, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: UserId,
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: usize,
}

/// POST /messages - Send a message
#[utoipa::path(
    post,
    path = "/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent"),
        (status = 400, description = "Empty content or message to self"),
        (status = 404, description = "No such receiver")
    ),
    security(("bearer" = []))
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .market
        .messaging
        .send(user_id, req.receiver_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/conversations - One summary per partner, most recent first
#[utoipa::path(
    get,
    path = "/messages/conversations",
    responses((status = 200, description = "Conversation summaries")),
    security(("bearer" = []))
)]
pub async fn conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Json<Vec<Conversation>> {
    Json(state.market.messaging.conversations_for(user_id).await)
}

/// GET /messages/with/{user_id} - The thread with one partner; marks it read
#[utoipa::path(
    get,
    path = "/messages/with/{user_id}",
    params(("user_id" = i64, Path, description = "Conversation partner")),
    responses((status = 200, description = "Messages, oldest first")),
    security(("bearer" = []))
)]
pub async fn thread_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(partner_id): Path<UserId>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messaging = &state.market.messaging;
    messaging.mark_read(partner_id, user_id).await?;
    Ok(Json(messaging.between(user_id, partner_id).await))
}

/// GET /messages/unread-count - Unread messages addressed to the caller
#[utoipa::path(
    get,
    path = "/messages/unread-count",
    responses((status = 200, description = "Unread message count", body = UnreadCount)),
    security(("bearer" = []))
)]
pub async fn unread_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Json<UnreadCount> {
    Json(UnreadCount {
        unread_count: state.market.messaging.unread_total(user_id).await,
    })
}

/// DELETE /messages/{id} - Delete a message the caller sent or received
#[utoipa::path(
    delete,
    path = "/messages/{id}",
    params(("id" = i64, Path, description = "Message id")),
    responses(
        (status = 204, description = "Message deleted"),
        (status = 403, description = "Not a participant")
    ),
    security(("bearer" = []))
)]
pub async fn delete_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(message_id): Path<MessageId>,
) -> Result<StatusCode, ApiError> {
    state.market.messaging.delete(message_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
